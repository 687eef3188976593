//! Core transport vocabulary: ranks, tags, match keys and the
//! communicator/future traits.
//!
//! Wire format conventions (for transports with a 64-bit match key):
//! the key is `(user_tag << 32) | source_rank` and the receive-side mask
//! covers both halves, so a `(source, tag)` pair matches uniquely. The MPI
//! backend uses the native tag field directly and does not need the key.

use crate::halo_error::HaloExchangeError;

/// Process index within the transport world.
pub type Rank = usize;

/// Message tag disambiguating concurrent operations between one peer pair.
pub type Tag = u32;

const RANK_BITS: u32 = 32;
const SOURCE_MASK: u64 = 0x0000_0000_ffff_ffff;

/// Build the 64-bit match key for a message sent by `src` with `tag`.
#[inline]
pub const fn make_key(tag: Tag, src: Rank) -> u64 {
    ((tag as u64) << RANK_BITS) | (src as u32 as u64)
}

/// Source rank half of a match key.
#[inline]
pub const fn key_source(key: u64) -> Rank {
    (key & SOURCE_MASK) as Rank
}

/// User tag half of a match key.
#[inline]
pub const fn key_tag(key: u64) -> Tag {
    (key >> RANK_BITS) as Tag
}

/// Completion handle for one posted send or receive.
///
/// Exactly one of `ready() == true` / `ready() == false` holds at any
/// moment, and once an operation completes `ready()` stays true. A
/// cancelled operation still has to be reaped with `wait()`.
pub trait CommFuture {
    /// Block until the operation completes. Receives yield the payload;
    /// sends (and cancelled operations) yield `None`.
    fn wait(self) -> Result<Option<Vec<u8>>, HaloExchangeError>;

    /// Non-blocking completion test: true iff the operation has completed.
    fn ready(&mut self) -> bool;

    /// Attempt transport-level cancellation. Returns true iff the
    /// operation had not already completed and was cancelled.
    fn cancel(&mut self) -> bool;
}

/// Non-blocking tag-matched byte transport.
///
/// Within a single `(peer, tag)` pair, messages are delivered in post
/// order; nothing is ordered across different tags.
pub trait Communicator: Send + Sync {
    type SendFuture: CommFuture;
    type RecvFuture: CommFuture;

    /// Post a non-blocking send of `buf` to `peer` with `tag`.
    fn isend(
        &self,
        peer: Rank,
        tag: Tag,
        buf: &[u8],
    ) -> Result<Self::SendFuture, HaloExchangeError>;

    /// Post a non-blocking receive of exactly `len` bytes from `peer`
    /// with `tag`.
    fn irecv(
        &self,
        peer: Rank,
        tag: Tag,
        len: usize,
    ) -> Result<Self::RecvFuture, HaloExchangeError>;

    /// Rank of this process (0..size-1).
    fn rank(&self) -> Rank;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Pop one queued message not matched by any posted receive, if the
    /// transport can observe such a thing. Used by the dispatcher's
    /// unexpected-message path; transports without a probe return `None`.
    fn probe_any(&self) -> Option<(Rank, Tag, Vec<u8>)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_packs_both_halves() {
        let key = make_key(42, 3);
        assert_eq!(key_tag(key), 42);
        assert_eq!(key_source(key), 3);
    }

    #[test]
    fn key_distinguishes_source() {
        assert_ne!(make_key(7, 0), make_key(7, 1));
        assert_ne!(make_key(7, 0), make_key(8, 0));
    }

    #[test]
    fn key_uses_full_tag_range() {
        let key = make_key(u32::MAX, usize::MAX);
        assert_eq!(key_tag(key), u32::MAX);
        assert_eq!(key_source(key), u32::MAX as usize);
    }
}
