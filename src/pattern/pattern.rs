//! Domain identities and the resolved send/receive plan per subdomain.

use super::iteration::IterationSpacePair;
use crate::transport::communicator::{Rank, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application-level identifier of one subdomain, unique across the whole
/// distributed system.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
pub struct DomainId(u64);

impl DomainId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for DomainId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A domain id augmented with everything needed to route a message to it:
/// owning rank, transport address and the disambiguating tag assigned by
/// the pattern builder.
///
/// Ordered by `(id, tag)`: domain ids are globally unique, and the tag
/// keeps multiple halos between the same pair of domains apart.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ExtendedDomainId {
    pub id: DomainId,
    pub rank: Rank,
    pub address: Rank,
    pub tag: Tag,
}

impl Ord for ExtendedDomainId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id).then(self.tag.cmp(&other.tag))
    }
}

impl PartialOrd for ExtendedDomainId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ExtendedDomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{id={}, tag={}, rank={}}}",
            self.id, self.tag, self.rank
        )
    }
}

/// Halo map: per peer domain, the list of regions to pack or scatter.
pub type HaloMap<const D: usize> = BTreeMap<ExtendedDomainId, Vec<IterationSpacePair<D>>>;

/// The resolved communication plan for one owned subdomain.
///
/// `recv_halos` maps each peer we receive from to the regions written into
/// our buffer; `send_halos` maps each peer we send to to the regions read
/// out of it. For every `(A sends to B, tag, regions)` entry in A's
/// send halos there is a matching entry in B's recv halos with the same
/// tag and per-side local geometry; the builder guarantees this.
///
/// Patterns are built once and read-only during exchanges.
#[derive(Clone, Debug)]
pub struct Pattern<const D: usize> {
    id: ExtendedDomainId,
    extents: IterationSpacePair<D>,
    send_halos: HaloMap<D>,
    recv_halos: HaloMap<D>,
}

impl<const D: usize> Pattern<D> {
    pub(crate) fn new(id: ExtendedDomainId, extents: IterationSpacePair<D>) -> Self {
        Self {
            id,
            extents,
            send_halos: BTreeMap::new(),
            recv_halos: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn domain_id(&self) -> DomainId {
        self.id.id
    }

    #[inline]
    pub fn extended_domain_id(&self) -> ExtendedDomainId {
        self.id
    }

    /// Local and global extents of the owned subdomain (local origin zero).
    #[inline]
    pub fn extents(&self) -> &IterationSpacePair<D> {
        &self.extents
    }

    #[inline]
    pub fn send_halos(&self) -> &HaloMap<D> {
        &self.send_halos
    }

    #[inline]
    pub fn recv_halos(&self) -> &HaloMap<D> {
        &self.recv_halos
    }

    pub(crate) fn send_halos_mut(&mut self) -> &mut HaloMap<D> {
        &mut self.send_halos
    }

    pub(crate) fn recv_halos_mut(&mut self) -> &mut HaloMap<D> {
        &mut self.recv_halos
    }

    /// Total number of grid points across a halo's region list.
    pub fn num_elements(spaces: &[IterationSpacePair<D>]) -> usize {
        spaces.iter().map(IterationSpacePair::size).sum()
    }
}
