//! Halo patterns: who sends what to whom, for structured grids.
//!
//! A [`Pattern`](pattern::Pattern) is the fully-resolved send/receive plan
//! for one owned subdomain: per peer, the tag and the list of inclusive
//! N-dimensional boxes ([`IterationSpacePair`](iteration::IterationSpacePair))
//! to pack or scatter. Patterns are computed once, collectively, by
//! [`make_patterns`](builder::make_patterns) and are read-only afterwards.

pub mod builder;
pub mod coordinate;
pub mod domain;
pub mod iteration;
#[allow(clippy::module_inception)]
pub mod pattern;

pub use builder::make_patterns;
pub use coordinate::Coordinate;
pub use domain::{DomainDescriptor, HaloGenerator};
pub use iteration::{IterationSpace, IterationSpacePair};
pub use pattern::{DomainId, ExtendedDomainId, Pattern};
