//! HaloExchangeError: unified error type for halo-exchange public APIs.
//!
//! Transport failures and programming errors surface through this enum;
//! cancellation results are ordinary boolean returns and never errors.
//! The one fatality the library enforces itself (dropping a callback
//! dispatcher with pending operations) aborts the process instead of
//! returning here.

use crate::transport::communicator::{Rank, Tag};
use thiserror::Error;

/// Unified error type for halo-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloExchangeError {
    /// A transport-level call returned non-success.
    #[error("transport call `{call}` failed: {detail}")]
    Transport { call: &'static str, detail: String },
    /// A peer rank outside `0..world_size` was named.
    #[error("peer rank {peer} out of range for world size {size}")]
    PeerOutOfRange { peer: Rank, size: usize },
    /// `detach` asked for an operation that is not registered.
    #[error("no pending {direction} operation for peer {peer}, tag {tag}")]
    DetachMiss {
        direction: &'static str,
        peer: Rank,
        tag: Tag,
    },
    /// `attach` found a live record with the same `(peer, tag)`.
    #[error("a pending {direction} operation already exists for peer {peer}, tag {tag}")]
    AttachConflict {
        direction: &'static str,
        peer: Rank,
        tag: Tag,
    },
    /// A setup-phase exchange with a peer failed or decoded inconsistently.
    #[error("setup exchange with rank {peer} failed: {detail}")]
    SetupExchange { peer: Rank, detail: String },
    /// A peer referenced a domain id this process does not own.
    #[error("domain id {0} not found among local patterns")]
    UnknownDomain(u64),
    /// A wire payload had an unexpected length.
    #[error("wire payload size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: usize, got: usize },
}
