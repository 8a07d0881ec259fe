//! The persistent chunk interface (C1).
//!
//! This is an external collaborator per spec §1/§4.1: the epoch subsystem only ever asks it to
//! allocate/free a cache-line-aligned block, flush/fence it, and enumerate survivors after a
//! restart. The actual persistent heap (Ralloc or otherwise) is out of scope; `ChunkAllocator` is
//! the seam a real allocator plugs into, and `HeapChunkAllocator` is a `std::alloc`-backed
//! stand-in used by tests and by any data structure that only needs the epoch protocol's
//! bookkeeping, not real crash durability.

use crate::config::PwbKind;
use std::{
    alloc::{self, Layout},
    collections::HashSet,
    ptr::NonNull,
    sync::Mutex,
};

/// Durable, cache-line-aligned memory alignment required of every chunk (§4.1: "aligned to cache
/// line").
pub const CACHE_LINE: usize = 64;

/// The contract §4.1 requires of a persistent heap. Implementations own crash-consistent
/// allocation; the epoch subsystem only calls these four operations plus `live_chunks` after a
/// restart.
pub trait ChunkAllocator: Send + Sync {
    /// Allocates a cache-line-aligned chunk of at least `size` bytes in the persistent address
    /// range. Returns `None` on exhaustion (surfaced by callers as `EpochSysError::AllocFailure`).
    fn pmalloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases a chunk previously returned by `pmalloc`.
    ///
    /// # Safety
    /// `ptr`/`size` must be exactly as returned by a prior `pmalloc`, and must not be freed twice.
    unsafe fn pfree(&self, ptr: NonNull<u8>, size: usize);

    /// Writes back `len` bytes starting at `addr` to durable media. Idempotent; ordering is only
    /// provided by a subsequent `pfence`.
    fn pflush(&self, addr: NonNull<u8>, len: usize);

    /// A durability store barrier: every `pflush` issued before this call is ordered before any
    /// effect observable after it returns.
    fn pfence(&self);

    /// After a restart, returns every chunk that was allocated and not yet freed at crash time.
    /// `n_threads` shards the walk so recovery can parallelize across it; implementations that
    /// can't shard may ignore it and return everything from shard `0`.
    fn live_chunks(&self, n_threads: usize, shard: usize) -> Vec<(NonNull<u8>, usize)>;

    /// Which cache-line writeback instruction backs `pflush` (§6 `durability_primitive_set`).
    fn pwb_kind(&self) -> PwbKind;
}

/// A volatile stand-in for the persistent heap, backed by `std::alloc`.
///
/// Chunks vanish on process exit like any other heap allocation, so `live_chunks` after a real
/// crash would find nothing; this implementation instead tracks its own live set in memory, which
/// is exactly enough to drive the epoch protocol's unit tests (`EpochSys::simulate_crash`, §8
/// scenarios S1/S2/S5) without a real NVM-backed allocator.
pub struct HeapChunkAllocator {
    live: Mutex<HashSet<(usize, usize)>>,
    pwb_kind: PwbKind,
}

impl HeapChunkAllocator {
    pub fn new(pwb_kind: PwbKind) -> Self {
        HeapChunkAllocator {
            live: Mutex::new(HashSet::new()),
            pwb_kind,
        }
    }

    fn layout_for(size: usize) -> Layout {
        Layout::from_size_align(size.max(1), CACHE_LINE).expect("chunk layout overflow")
    }
}

impl ChunkAllocator for HeapChunkAllocator {
    fn pmalloc(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(size);
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)?;
        self.live.lock().unwrap().insert((ptr.as_ptr() as usize, size));
        Some(ptr)
    }

    unsafe fn pfree(&self, ptr: NonNull<u8>, size: usize) {
        self.live.lock().unwrap().remove(&(ptr.as_ptr() as usize, size));
        alloc::dealloc(ptr.as_ptr(), Self::layout_for(size));
    }

    fn pflush(&self, _addr: NonNull<u8>, _len: usize) {
        // volatile memory, nothing to write back; real allocators execute CLWB/CLFLUSHOPT here.
    }

    fn pfence(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }

    fn live_chunks(&self, n_threads: usize, shard: usize) -> Vec<(NonNull<u8>, usize)> {
        if shard >= n_threads.max(1) {
            return Vec::new();
        }
        self.live
            .lock()
            .unwrap()
            .iter()
            .filter(|(addr, _)| (addr / CACHE_LINE) % n_threads.max(1) == shard)
            .map(|&(addr, size)| (NonNull::new(addr as *mut u8).unwrap(), size))
            .collect()
    }

    fn pwb_kind(&self) -> PwbKind {
        self.pwb_kind
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pmalloc_is_cache_line_aligned() {
        let alloc = HeapChunkAllocator::new(PwbKind::Clwb);
        let ptr = alloc.pmalloc(32).unwrap();
        assert_eq!(ptr.as_ptr() as usize % CACHE_LINE, 0);
        unsafe { alloc.pfree(ptr, 32) };
    }

    #[test]
    fn freed_chunks_are_not_live() {
        let alloc = HeapChunkAllocator::new(PwbKind::Clwb);
        let ptr = alloc.pmalloc(32).unwrap();
        assert_eq!(alloc.live_chunks(1, 0).len(), 1);
        unsafe { alloc.pfree(ptr, 32) };
        assert_eq!(alloc.live_chunks(1, 0).len(), 0);
    }
}
