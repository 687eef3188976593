//! # halo-exchange
//!
//! halo-exchange is a pattern-based halo-exchange transport library for
//! distributed structured-grid computations. Given a set of local
//! subdomains spread across processes and a halo generator, it computes
//! the full communication plan (who sends which grid regions to whom,
//! under which tags) and drives the packed byte exchange over a
//! tag-matched, non-blocking transport.
//!
//! ## Subsystems
//! - Byte buffers with non-preserving growth, a caching (persistent)
//!   allocator and reference-counted shared messages
//! - A tag-matched transport with future-based completion (wait / ready /
//!   cancel), an in-process thread backend and an MPI backend
//!   (feature `mpi-support`)
//! - A callback dispatcher with a progress engine, multi-destination
//!   sends, detach/attach and cancellation
//! - Collective pattern construction resolving receive halos into
//!   symmetric send/receive plans with disambiguating tags
//! - A communication object that packs, posts, waits and unpacks per
//!   exchange
//!
//! ## Usage
//! Construct a [`transport::ThreadContext`] (or `MpiComm` with the
//! `mpi-support` feature), build patterns with
//! [`pattern::make_patterns`], wrap fields in
//! [`exchange::SimpleField`] and run
//! [`exchange::CommunicationObject::exchange`].

pub mod buffer;
pub mod exchange;
pub mod halo_error;
pub mod pattern;
pub mod setup;
pub mod transport;

/// A convenient prelude importing the most-used traits and types.
pub mod prelude {
    pub use crate::buffer::{Buffer, PersistentAlloc, SharedMessage, SystemAlloc};
    pub use crate::exchange::{CommunicationObject, FieldDescriptor, SimpleField};
    pub use crate::halo_error::HaloExchangeError;
    pub use crate::pattern::{
        make_patterns, Coordinate, DomainDescriptor, DomainId, ExtendedDomainId,
        HaloGenerator, IterationSpace, IterationSpacePair, Pattern,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::setup::MpiSetupComm;
    pub use crate::setup::{SetupComm, ThreadSetupComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::transport::MpiComm;
    pub use crate::transport::{
        await_futures, CallbackDispatcher, CommFuture, Communicator, Rank, Tag,
        ThreadComm, ThreadContext,
    };
}
