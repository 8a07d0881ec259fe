//! The thread reservation table (C3).
//!
//! A per-thread cache-line-padded atomic epoch that other threads spin-read while waiting to
//! close an epoch: a fixed-size array indexed by `tid`, since §6 fixes `n_threads` at `init` time
//! and hands out a stable `tid` per thread via `thread_init` rather than registering threads as
//! they happen to show up.

use crate::internal::epoch::{AtomicEpoch, Epoch};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

/// One thread's reservation, cache-line padded so that polling it doesn't false-share with
/// neighboring threads' reservations.
#[repr(align(64))]
#[derive(Debug)]
pub struct Reservation {
    epoch: AtomicEpoch,
}

impl Reservation {
    #[inline]
    const fn unreserved() -> Self {
        Reservation {
            epoch: AtomicEpoch::new(Epoch::NULL),
        }
    }

    /// The epoch this thread is currently pinned to, or `Epoch::NULL` if it isn't in an op frame.
    #[inline]
    pub fn get(&self) -> Epoch {
        self.epoch.load(Acquire)
    }

    #[inline]
    pub(crate) fn pin(&self, epoch: Epoch) {
        debug_assert!(!epoch.is_null(), "pinning a reservation to NULL_EPOCH");
        debug_assert!(self.get().is_null(), "reservation already pinned");
        self.epoch.store(epoch, Release);
    }

    #[inline]
    pub(crate) fn unpin(&self) {
        debug_assert!(!self.get().is_null(), "unpinning an already-unreserved reservation");
        self.epoch.store(Epoch::NULL, Release);
    }

    /// Is this thread possibly still observing state from `epoch` or earlier?
    #[inline]
    pub fn blocks(&self, epoch: Epoch) -> bool {
        let reserved = self.get();
        !reserved.is_null() && reserved.get() <= epoch.get()
    }
}

/// A fixed-size table of reservations, one slot per `tid` in `0..n_threads`.
pub struct ReservationTable {
    slots: Box<[Reservation]>,
}

impl ReservationTable {
    pub fn new(n_threads: usize) -> Self {
        let mut slots = Vec::with_capacity(n_threads);
        slots.resize_with(n_threads, Reservation::unreserved);
        ReservationTable {
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn get(&self, tid: usize) -> &Reservation {
        &self.slots[tid]
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.slots.iter()
    }

    /// The minimum reserved epoch across every thread, or `None` if nobody is pinned.
    ///
    /// Used by the advancer (C6) to decide how far an epoch can safely close: the clock may only
    /// advance past `e` once every reservation is `> e` or unreserved.
    pub fn min_reserved(&self) -> Option<Epoch> {
        self.slots
            .iter()
            .map(Reservation::get)
            .filter(|e| !e.is_null())
            .min()
    }

    /// Busy-waits until no reservation blocks `epoch` any longer.
    ///
    /// Used while draining `to_retire[epoch]`: the storage may only be freed once no thread can
    /// still be observing it.
    pub fn quiesce(&self, epoch: Epoch) {
        for slot in self.slots.iter() {
            let mut spins: u32 = 0;
            while slot.blocks(epoch) {
                spins += 1;
                if spins < 64 {
                    core::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unreserved_never_blocks() {
        let table = ReservationTable::new(4);
        assert_eq!(table.min_reserved(), None);
        for r in table.iter() {
            assert!(!r.blocks(Epoch::new(1)));
        }
    }

    #[test]
    fn pin_blocks_until_unpin() {
        let table = ReservationTable::new(2);
        table.get(0).pin(Epoch::new(3));
        assert!(table.get(0).blocks(Epoch::new(3)));
        assert!(table.get(0).blocks(Epoch::new(4)));
        assert!(!table.get(0).blocks(Epoch::new(2)));
        assert_eq!(table.min_reserved(), Some(Epoch::new(3)));
        table.get(0).unpin();
        assert_eq!(table.min_reserved(), None);
    }
}
