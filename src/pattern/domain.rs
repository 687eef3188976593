//! Subdomain descriptor and the halo-generator contract.

use super::coordinate::Coordinate;
use super::iteration::IterationSpacePair;
use super::pattern::DomainId;

/// One locally-owned structured subdomain: its id and the inclusive global
/// coordinate range it covers.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DomainDescriptor<const D: usize> {
    id: DomainId,
    first: Coordinate<D>,
    last: Coordinate<D>,
}

impl<const D: usize> DomainDescriptor<D> {
    pub fn new(id: DomainId, first: Coordinate<D>, last: Coordinate<D>) -> Self {
        debug_assert!(first.le_all(last), "inverted domain extents");
        Self { id, first, last }
    }

    #[inline]
    pub fn domain_id(&self) -> DomainId {
        self.id
    }

    #[inline]
    pub fn first(&self) -> Coordinate<D> {
        self.first
    }

    #[inline]
    pub fn last(&self) -> Coordinate<D> {
        self.last
    }
}

/// Produces, for a subdomain, the halo regions it needs to *receive*:
/// pairs of (local, global) boxes. The builder drops empty regions and
/// resolves the rest against every other domain's extent, so a generator
/// may emit regions that fall outside the global domain; they simply
/// match nothing.
pub trait HaloGenerator<const D: usize> {
    fn generate(&self, domain: &DomainDescriptor<D>) -> Vec<IterationSpacePair<D>>;
}

impl<F, const D: usize> HaloGenerator<D> for F
where
    F: Fn(&DomainDescriptor<D>) -> Vec<IterationSpacePair<D>>,
{
    fn generate(&self, domain: &DomainDescriptor<D>) -> Vec<IterationSpacePair<D>> {
        self(domain)
    }
}
