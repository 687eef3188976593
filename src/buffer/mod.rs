//! Byte buffers and allocators for packed halo messages.
//!
//! [`Buffer`] is an owning byte buffer whose growth deliberately does *not*
//! preserve contents: exchange code rewrites the packed payload from scratch
//! every step, so copying on reallocation would be wasted work.
//! [`PersistentAlloc`] caches freed allocations by size so steady-state
//! exchanges stop hitting the base allocator entirely, and
//! [`SharedMessage`] is the reference-counted handle used when one payload
//! fans out to several destinations.

pub mod message;
pub mod persistent;
pub mod shared;

pub use message::{Buffer, ByteAllocator, SystemAlloc};
pub use persistent::PersistentAlloc;
pub use shared::SharedMessage;
