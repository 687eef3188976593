//! Reference-counted message payload for multi-destination sends.

use super::message::{Buffer, ByteAllocator, SystemAlloc};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Reference-counted handle to a [`Buffer`].
///
/// Cloning a `SharedMessage` is shallow; the payload drops exactly when the
/// last handle does. The callback dispatcher keeps a handle per pending
/// operation, which is why a fan-out send can release the caller's handle
/// immediately after posting. Dispatchers are single-threaded, so the count
/// is an `Rc` count.
pub struct SharedMessage<A: ByteAllocator = SystemAlloc> {
    inner: Rc<RefCell<Buffer<A>>>,
}

impl<A: ByteAllocator> Clone for SharedMessage<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl SharedMessage<SystemAlloc> {
    /// A message with `size` uninitialized bytes over the system heap.
    pub fn with_size(size: usize) -> Self {
        Self::from_buffer(Buffer::with_size(size, SystemAlloc))
    }
}

impl<A: ByteAllocator> SharedMessage<A> {
    pub fn from_buffer(buffer: Buffer<A>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(buffer)),
        }
    }

    /// Number of live handles to this payload.
    #[inline]
    pub fn use_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.inner.borrow().size()
    }

    pub fn resize(&self, n: usize) {
        self.inner.borrow_mut().resize(n);
    }

    pub fn data(&self) -> Ref<'_, [u8]> {
        Ref::map(self.inner.borrow(), |b| b.data())
    }

    pub fn data_mut(&self) -> RefMut<'_, [u8]> {
        RefMut::map(self.inner.borrow_mut(), |b| b.data_mut())
    }
}

impl<A: ByteAllocator> std::fmt::Debug for SharedMessage<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMessage")
            .field("size", &self.size())
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_count_tracks_handles() {
        let m = SharedMessage::with_size(16);
        assert_eq!(m.use_count(), 1);
        let m2 = m.clone();
        assert_eq!(m.use_count(), 2);
        drop(m2);
        assert_eq!(m.use_count(), 1);
    }

    #[test]
    fn clones_share_payload() {
        let m = SharedMessage::with_size(4);
        m.data_mut().copy_from_slice(&[1, 2, 3, 4]);
        let m2 = m.clone();
        assert_eq!(&m2.data()[..], &[1, 2, 3, 4]);
        m2.data_mut()[0] = 9;
        assert_eq!(m.data()[0], 9);
    }
}
