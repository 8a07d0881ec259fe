//! The software CAS descriptor pool (C8): the fallback path `lin_var::LinVar::cas_verify` takes
//! when the hardware transactional memory fast path isn't available or keeps aborting.
//!
//! A two-phase protocol - try HTM, fall back to a software path other threads can help complete -
//! backed by one fixed slot per `tid` rather than a heap-allocated descriptor per attempt (§9's
//! design note: "a descriptor pool indexed by thread id is sufficient since a thread can only
//! have one DCAS in flight at a time"). A descriptor's identity, as stored in a `LinVar`'s `raw`
//! field while installed, is `tid + 1` - `0` stays reserved as "no descriptor".
//!
//! The epoch-verify linearization property lives in `decide`: it is the only place that reads the
//! live global epoch against the descriptor's `cas_epoch` - whoever calls it first (the installer
//! or a helper) commits the descriptor iff the epoch hasn't moved on, else aborts it. The
//! decision, once made, is terminal.

use crate::internal::epoch::{Epoch, EpochClock};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering::*};

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DescStatus {
    /// Installed in a `LinVar`, not yet decided by anyone.
    InProgress = 0,
    /// `global_epoch == cas_epoch` held at decision time; the completing CAS writes `new_raw`.
    Committed = 1,
    /// The epoch moved on before anyone decided; the completing CAS restores `old_raw`.
    Aborted = 2,
}

impl DescStatus {
    fn from_u8(v: u8) -> DescStatus {
        match v {
            v if v == DescStatus::InProgress as u8 => DescStatus::InProgress,
            v if v == DescStatus::Committed as u8 => DescStatus::Committed,
            _ => DescStatus::Aborted,
        }
    }
}

/// One thread's DCAS descriptor slot, cache-line padded to avoid false sharing while other
/// threads poll `status`/`target` to help.
#[repr(align(64))]
struct ScDescSlot {
    status: AtomicU8,
    /// Address of the `LinVar` currently being completed by this slot, or `0` if idle.
    target: AtomicUsize,
    old_raw: AtomicU64,
    new_raw: AtomicU64,
    /// The `cnt` value the completing CAS must install (i.e. the installed cnt + 1).
    completed_cnt: AtomicU64,
    /// The epoch this descriptor's CAS wants to linearize inside (§4.8 `cas_epoch`).
    cas_epoch: AtomicU64,
}

impl ScDescSlot {
    const fn idle() -> Self {
        ScDescSlot {
            status: AtomicU8::new(DescStatus::Committed as u8),
            target: AtomicUsize::new(0),
            old_raw: AtomicU64::new(0),
            new_raw: AtomicU64::new(0),
            completed_cnt: AtomicU64::new(0),
            cas_epoch: AtomicU64::new(0),
        }
    }
}

/// A snapshot of a descriptor's intent, read by a helper before attempting the completing CAS.
#[derive(Clone, Copy, Debug)]
pub struct ScDescView {
    pub target: usize,
    pub old_raw: u64,
    pub new_raw: u64,
    pub completed_cnt: u64,
}

/// The fixed per-thread descriptor pool.
pub struct ScDescTable {
    slots: Box<[ScDescSlot]>,
}

impl ScDescTable {
    pub fn new(n_threads: usize) -> Self {
        let mut slots = Vec::with_capacity(n_threads);
        slots.resize_with(n_threads, ScDescSlot::idle);
        ScDescTable {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Installs `tid`'s slot with a new in-progress descriptor for `target`, returning the bit
    /// pattern (`tid + 1`) the caller should try to CAS into the `LinVar`.
    pub fn install(
        &self,
        tid: usize,
        target: usize,
        old_raw: u64,
        new_raw: u64,
        completed_cnt: u64,
        cas_epoch: Epoch,
    ) -> u64 {
        let slot = &self.slots[tid];
        slot.old_raw.store(old_raw, Relaxed);
        slot.new_raw.store(new_raw, Relaxed);
        slot.completed_cnt.store(completed_cnt, Relaxed);
        slot.cas_epoch.store(cas_epoch.get(), Relaxed);
        slot.target.store(target, Release);
        slot.status.store(DescStatus::InProgress as u8, Release);
        pds_stats::sc_desc_installed();
        (tid + 1) as u64
    }

    /// `try_complete` (§4.8): decides `tid`'s in-progress descriptor against the live epoch clock.
    /// Idempotent and safe to call from any number of racing helpers - only the first CAS to land
    /// has any effect, and every caller observes the same terminal status afterward.
    pub fn decide(&self, tid: usize, clock: &EpochClock) -> DescStatus {
        let slot = &self.slots[tid];
        let current = DescStatus::from_u8(slot.status.load(Acquire));
        if current != DescStatus::InProgress {
            return current;
        }
        let cas_epoch = Epoch::new(slot.cas_epoch.load(Relaxed));
        let outcome = if clock.check(cas_epoch) {
            DescStatus::Committed
        } else {
            DescStatus::Aborted
        };
        let _ = slot.status.compare_exchange(
            DescStatus::InProgress as u8,
            outcome as u8,
            AcqRel,
            Acquire,
        );
        DescStatus::from_u8(slot.status.load(Acquire))
    }

    /// Called by the installing thread once the completing CAS on the owner `LinVar` has gone
    /// through (by this thread or a helper), freeing the slot for its next `install`.
    pub fn retire(&self, tid: usize) {
        let slot = &self.slots[tid];
        slot.status.store(DescStatus::Committed as u8, Release);
        slot.target.store(0, Release);
    }

    /// Reads `tid`'s descriptor if it is still installed against `target` (in any status - a
    /// helper needs `old_raw`/`new_raw` even after the descriptor has been decided, to perform the
    /// completing CAS).
    ///
    /// Returns `None` if the slot has already been retired or was reused for a different target -
    /// either way there is nothing left for a helper to do.
    pub fn view(&self, tid: usize, target: usize) -> Option<ScDescView> {
        let slot = &self.slots[tid];
        if slot.target.load(Acquire) != target {
            return None;
        }
        Some(ScDescView {
            target,
            old_raw: slot.old_raw.load(Relaxed),
            new_raw: slot.new_raw.load(Relaxed),
            completed_cnt: slot.completed_cnt.load(Relaxed),
        })
    }

    /// Records that another thread helped complete `tid`'s descriptor rather than `tid` itself.
    pub fn record_helped(&self) {
        pds_stats::sc_desc_helped();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn install_then_view_then_retire() {
        let table = ScDescTable::new(2);
        let packed = table.install(0, 0x1000, 10, 42, 7, Epoch::new(3));
        assert_eq!(packed, 1);
        let view = table.view(0, 0x1000).expect("descriptor should be visible");
        assert_eq!(view.old_raw, 10);
        assert_eq!(view.new_raw, 42);
        assert_eq!(view.completed_cnt, 7);
        table.retire(0);
        assert!(table.view(0, 0x1000).is_none());
    }

    #[test]
    fn view_rejects_stale_target() {
        let table = ScDescTable::new(1);
        table.install(0, 0x1000, 10, 42, 7, Epoch::new(1));
        assert!(table.view(0, 0x2000).is_none());
    }

    #[test]
    fn decide_commits_when_epoch_unchanged() {
        let clock = EpochClock::new();
        let table = ScDescTable::new(1);
        table.install(0, 0x1000, 10, 42, 7, clock.now());
        assert_eq!(table.decide(0, &clock), DescStatus::Committed);
        // terminal: a second call returns the same answer without re-checking the epoch.
        assert_eq!(table.decide(0, &clock), DescStatus::Committed);
    }

    #[test]
    fn decide_aborts_when_epoch_moved_on() {
        let clock = EpochClock::new();
        let table = ScDescTable::new(1);
        table.install(0, 0x1000, 10, 42, 7, clock.now());
        assert_eq!(clock.try_advance(clock.now()), Ok(clock.now().next()));
        assert_eq!(table.decide(0, &clock), DescStatus::Aborted);
    }
}
