//! Per-epoch pending sets (C4): `to_persist`, `to_retire`, `in_construction`.
//!
//! Four rotating slots indexed by `epoch % 4` (§3, §4.4). Each slot holds three lock-free queues
//! of type-erased `(address, size)` pairs, since all three sets ultimately exist to hand pointers
//! to `pflush`/`pfree`, not to run destructors - PBlk payloads are `Freeze` and are reclaimed as
//! raw durable bytes.

use crossbeam_queue::SegQueue;
use std::ptr::NonNull;

/// A type-erased reference to a PBlk's header, for flushing or freeing.
#[derive(Clone, Copy, Debug)]
pub struct PendingPblk {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

unsafe impl Send for PendingPblk {}

#[derive(Default)]
struct PendingSlot {
    to_persist: SegQueue<PendingPblk>,
    to_retire: SegQueue<PendingPblk>,
    in_construction: SegQueue<PendingPblk>,
}

/// The four rotating pending-set slots shared by every thread.
pub struct PendingSets {
    slots: [PendingSlot; 4],
}

impl PendingSets {
    pub fn new() -> Self {
        PendingSets {
            slots: Default::default(),
        }
    }

    #[inline]
    fn slot(&self, epoch_slot: usize) -> &PendingSlot {
        &self.slots[epoch_slot]
    }

    #[inline]
    pub fn push_to_persist(&self, epoch_slot: usize, pblk: PendingPblk) {
        self.slot(epoch_slot).to_persist.push(pblk);
    }

    #[inline]
    pub fn push_to_retire(&self, epoch_slot: usize, pblk: PendingPblk) {
        self.slot(epoch_slot).to_retire.push(pblk);
    }

    #[inline]
    pub fn push_in_construction(&self, epoch_slot: usize, pblk: PendingPblk) {
        self.slot(epoch_slot).in_construction.push(pblk);
    }

    /// Merges `in_construction[e]` into `to_persist[e]` at frame end (normal path, §4.4).
    pub fn publish_in_construction(&self, epoch_slot: usize) {
        let slot = self.slot(epoch_slot);
        while let Some(pblk) = slot.in_construction.pop() {
            slot.to_persist.push(pblk);
        }
    }

    /// Drops `in_construction[e]` without publishing (abort path, §4.4), returning the entries so
    /// the caller can `pfree` them.
    pub fn take_in_construction(&self, epoch_slot: usize) -> Vec<PendingPblk> {
        let slot = self.slot(epoch_slot);
        let mut drained = Vec::new();
        while let Some(pblk) = slot.in_construction.pop() {
            drained.push(pblk);
        }
        drained
    }

    /// Drains every entry queued for `to_persist[epoch_slot]`, handing each to `f` (a flush).
    /// Leaves the slot empty for reuse four epochs from now.
    pub fn drain_to_persist(&self, epoch_slot: usize, mut f: impl FnMut(PendingPblk)) {
        let slot = self.slot(epoch_slot);
        while let Some(pblk) = slot.to_persist.pop() {
            f(pblk);
        }
    }

    /// Drains every entry queued for `to_retire[epoch_slot]`, handing each to `f` (a free).
    pub fn drain_to_retire(&self, epoch_slot: usize, mut f: impl FnMut(PendingPblk)) {
        let slot = self.slot(epoch_slot);
        while let Some(pblk) = slot.to_retire.pop() {
            f(pblk);
        }
    }
}

impl Default for PendingSets {
    fn default() -> Self {
        PendingSets::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dummy(n: usize) -> PendingPblk {
        PendingPblk {
            ptr: NonNull::new(n as *mut u8).unwrap(),
            size: 8,
        }
    }

    #[test]
    fn publish_moves_in_construction_to_persist() {
        let sets = PendingSets::new();
        sets.push_in_construction(1, dummy(0x1000));
        sets.publish_in_construction(1);
        let mut seen = Vec::new();
        sets.drain_to_persist(1, |p| seen.push(p.ptr.as_ptr() as usize));
        assert_eq!(seen, vec![0x1000]);
    }

    #[test]
    fn take_in_construction_drops_nothing_into_persist() {
        let sets = PendingSets::new();
        sets.push_in_construction(2, dummy(0x2000));
        let drained = sets.take_in_construction(2);
        assert_eq!(drained.len(), 1);
        let mut seen = Vec::new();
        sets.drain_to_persist(2, |p| seen.push(p.ptr.as_ptr() as usize));
        assert!(seen.is_empty());
    }
}
