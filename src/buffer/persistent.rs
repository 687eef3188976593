//! Caching allocator adaptor: freed blocks are kept for reuse.

use super::message::ByteAllocator;
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

/// Allocator adaptor that never returns memory to the base allocator while
/// alive. Freed blocks are cached by size; `allocate(n)` hands back the
/// smallest cached block with `size >= n` if one exists, so a returned
/// allocation may be strictly larger than requested (callers track their
/// own requested size). Every cached block is released through the base
/// allocator when the last handle drops.
///
/// Handles clone cheaply and share one pool, so a buffer can carry its own
/// handle for the deallocation on drop.
pub struct PersistentAlloc<A: ByteAllocator = super::message::SystemAlloc> {
    state: Arc<Mutex<Pool<A>>>,
}

impl<A: ByteAllocator> Clone for PersistentAlloc<A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

struct Pool<A: ByteAllocator> {
    base: A,
    /// Cached blocks keyed by true allocation size; a size may hold several.
    free: BTreeMap<usize, Vec<usize>>,
    /// Live blocks keyed by address, remembering the true allocation size.
    used: HashMap<usize, usize>,
}

impl<A: ByteAllocator + Default> Default for PersistentAlloc<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: ByteAllocator> PersistentAlloc<A> {
    pub fn new(base: A) -> Self {
        Self {
            state: Arc::new(Mutex::new(Pool {
                base,
                free: BTreeMap::new(),
                used: HashMap::new(),
            })),
        }
    }

    /// Number of distinct cached (free) blocks.
    pub fn free_count(&self) -> usize {
        let pool = self.state.lock().expect("allocator pool poisoned");
        pool.free.values().map(Vec::len).sum()
    }

    /// Number of live (used) blocks.
    pub fn used_count(&self) -> usize {
        let pool = self.state.lock().expect("allocator pool poisoned");
        pool.used.len()
    }
}

impl<A: ByteAllocator> ByteAllocator for PersistentAlloc<A> {
    fn allocate(&self, n: usize) -> NonNull<u8> {
        if n == 0 {
            return NonNull::dangling();
        }
        let mut pool = self.state.lock().expect("allocator pool poisoned");
        // smallest cached block large enough
        if let Some(size) = pool.free.range(n..).next().map(|(s, _)| *s) {
            let bucket = pool.free.get_mut(&size).expect("free bucket vanished");
            let addr = bucket.pop().expect("empty free bucket");
            if bucket.is_empty() {
                pool.free.remove(&size);
            }
            pool.used.insert(addr, size);
            return NonNull::new(addr as *mut u8).expect("null cached block");
        }
        let ptr = pool.base.allocate(n);
        pool.used.insert(ptr.as_ptr() as usize, n);
        ptr
    }

    fn deallocate(&self, ptr: NonNull<u8>, _n: usize) {
        let mut pool = self.state.lock().expect("allocator pool poisoned");
        let addr = ptr.as_ptr() as usize;
        // unknown pointers are not ours; ignore (documented UB at the caller)
        if let Some(size) = pool.used.remove(&addr) {
            pool.free.entry(size).or_default().push(addr);
        }
    }
}

impl<A: ByteAllocator> Drop for Pool<A> {
    fn drop(&mut self) {
        for (&size, bucket) in &self.free {
            for &addr in bucket {
                self.base
                    .deallocate(NonNull::new(addr as *mut u8).expect("null cached block"), size);
            }
        }
        // anything still marked used belongs to buffers that outlive us;
        // the Arc keeps this pool alive until the last of them drops, so
        // by the time we get here the map is empty in correct programs.
        for (&addr, &size) in &self.used {
            self.base
                .deallocate(NonNull::new(addr as *mut u8).expect("null live block"), size);
        }
    }
}
