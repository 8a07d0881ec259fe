//! Operation frames (C5): `begin_op`/`end_op`/`end_readonly_op`/`abort_op`.
//!
//! `OpFrame` is a capability token, not just a bookkeeping record: the only way a caller can reach
//! `Pblk`/`LinVar` operations (`pblk.rs`, `lin_var.rs`) is through a live `&OpFrame`, so calling any
//! of them outside an operation is a compile error rather than a runtime `EpochSysError::NotInOp`
//! (§7 kind 1) discovered only once the closure actually runs.
//!
//! Nesting is refcounted per thread (§4.5: "nested `begin_op` calls share the outermost epoch").
//! Only the outermost `begin_op`/`end_op` pair touches the reservation table or the pending sets;
//! inner frames just borrow the epoch the outer frame already pinned.

use crate::{epochsys::EpochSys, internal::epoch::Epoch};
use std::{cell::Cell, ops::Deref};

thread_local! {
    static DEPTH: Cell<u32> = Cell::new(0);
}

/// `true` iff the calling thread has no op frame open. Backs the `field_unsafe`/
/// `field_unsafe_mut` debug assertions (§ supplemented features): those accessors are for
/// construction-time and single-threaded recovery use, strictly outside any frame.
#[inline]
pub(crate) fn no_frame_open() -> bool {
    DEPTH.with(|d| d.get() == 0)
}

/// A live operation on thread `tid`, pinned to `epoch`. Dropping it without calling `end_op`/
/// `end_readonly_op`/`abort_op` is a usage bug (see the `Drop` impl below) - on a normal exit path
/// the frame is always consumed by one of those three.
pub struct OpFrame<'a> {
    pub(crate) epoch_sys: &'a EpochSys,
    tid: usize,
    epoch: Epoch,
    readonly: bool,
    /// `true` for the outermost frame in this thread's nesting - only the outermost frame may
    /// unpin the reservation or merge the pending sets.
    outermost: bool,
    finished: bool,
}

impl<'a> OpFrame<'a> {
    #[inline]
    pub(crate) fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[inline]
    pub fn tid(&self) -> usize {
        self.tid
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        !self.outermost
    }

    fn finish(mut self) {
        self.finished = true;
        let depth = DEPTH.with(|d| {
            let next = d.get() - 1;
            d.set(next);
            next
        });
        debug_assert_eq!(depth == 0, self.outermost);
    }
}

impl<'a> Drop for OpFrame<'a> {
    fn drop(&mut self) {
        if !self.finished {
            // Only reachable if a caller forgets to route through end_op/abort_op; treat it as an
            // abort so a reservation can never leak past a panicking operation.
            if self.outermost {
                let _ = self.epoch_sys.take_in_construction_and_free(self.epoch);
                self.epoch_sys.reservations().get(self.tid).unpin();
            }
            DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        }
    }
}

impl EpochSys {
    fn enter(&self, tid: usize, readonly: bool) -> OpFrame<'_> {
        let depth = DEPTH.with(Cell::get);
        let (epoch, outermost) = if depth == 0 {
            let epoch = loop {
                let observed = self.clock().now();
                self.reservations().get(tid).pin(observed);
                // §4.3's two-read protocol: a concurrent advance between the first read and the
                // pin must not leave this thread reserved on an epoch that's already closed and
                // drained - re-read the clock and retry the pin if it moved.
                if self.clock().now() == observed {
                    break observed;
                }
                self.reservations().get(tid).unpin();
            };
            (epoch, true)
        } else {
            pds_stats::ops_nested();
            (self.reservations().get(tid).get(), false)
        };
        DEPTH.with(|d| d.set(depth + 1));
        pds_stats::ops_begun();
        OpFrame {
            epoch_sys: self,
            tid,
            epoch,
            readonly,
            outermost,
            finished: false,
        }
    }

    /// `begin_op` (§4.5): opens a read/write operation frame on `tid`.
    pub fn begin_op(&self, tid: usize) -> OpFrame<'_> {
        self.enter(tid, false)
    }

    /// The read-only equivalent of `begin_op` - `end_readonly_op` skips the persist-set merge
    /// since a read-only frame never calls `register_update`.
    pub fn begin_readonly_op(&self, tid: usize) -> OpFrame<'_> {
        self.enter(tid, true)
    }

    /// `end_op` (§4.5): commits the frame. On the outermost frame this publishes
    /// `in_construction` into `to_persist`, unpins the reservation, and may trigger an epoch
    /// advance per `EpochSysConfig::epoch_freq`.
    pub fn end_op(&self, frame: OpFrame<'_>) {
        let epoch = frame.epoch();
        let tid = frame.tid();
        let outermost = frame.outermost;
        frame.finish();
        if outermost {
            self.pending().publish_in_construction(epoch.slot());
            self.reservations().get(tid).unpin();
            pds_stats::ops_committed();
            self.maybe_advance();
        }
    }

    /// `end_readonly_op` (§4.5): commits a read-only frame. Never touches the pending sets.
    pub fn end_readonly_op(&self, frame: OpFrame<'_>) {
        let tid = frame.tid();
        let outermost = frame.outermost;
        frame.finish();
        if outermost {
            self.reservations().get(tid).unpin();
            pds_stats::ops_committed();
            self.maybe_advance();
        }
    }

    /// `abort_op` (§4.5): unwinds the frame. On the outermost frame, every PBlk this frame
    /// `register_alloc`'d and never published is freed instead of persisted - the caller's
    /// contract is that it must not have called `register_update`/`retire` before aborting.
    pub fn abort_op(&self, frame: OpFrame<'_>) {
        let epoch = frame.epoch();
        let tid = frame.tid();
        let outermost = frame.outermost;
        frame.finish();
        if outermost {
            self.take_in_construction_and_free(epoch);
            self.reservations().get(tid).unpin();
            pds_stats::ops_aborted();
        }
    }

    /// A scoped, write-capable op frame: commits on drop unless `OpGuard::abort` is called
    /// explicitly.
    pub fn scoped_op(&self, tid: usize) -> OpGuard<'_> {
        OpGuard {
            epoch_sys: self,
            frame: Some(self.begin_op(tid)),
        }
    }

    /// A scoped, read-only op frame: always `end_readonly_op`s on drop.
    pub fn scoped_read_op(&self, tid: usize) -> ReadOpGuard<'_> {
        ReadOpGuard {
            epoch_sys: self,
            frame: Some(self.begin_readonly_op(tid)),
        }
    }
}

/// RAII handle for a write-capable op frame. Derefs to `OpFrame` for `Pblk`/`LinVar` calls;
/// commits via `end_op` on drop, or call `abort` to unwind instead.
pub struct OpGuard<'a> {
    epoch_sys: &'a EpochSys,
    frame: Option<OpFrame<'a>>,
}

impl<'a> OpGuard<'a> {
    /// Unwinds the frame via `abort_op` instead of committing it.
    pub fn abort(mut self) {
        let frame = self.frame.take().expect("OpGuard used after abort");
        self.epoch_sys.abort_op(frame);
    }
}

impl<'a> Deref for OpGuard<'a> {
    type Target = OpFrame<'a>;

    fn deref(&self) -> &OpFrame<'a> {
        self.frame.as_ref().expect("OpGuard used after abort")
    }
}

impl<'a> Drop for OpGuard<'a> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.epoch_sys.end_op(frame);
        }
    }
}

/// RAII handle for a read-only op frame. Always commits via `end_readonly_op` on drop.
pub struct ReadOpGuard<'a> {
    epoch_sys: &'a EpochSys,
    frame: Option<OpFrame<'a>>,
}

impl<'a> Deref for ReadOpGuard<'a> {
    type Target = OpFrame<'a>;

    fn deref(&self) -> &OpFrame<'a> {
        self.frame.as_ref().expect("ReadOpGuard frame missing")
    }
}

impl<'a> Drop for ReadOpGuard<'a> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.epoch_sys.end_readonly_op(frame);
        }
    }
}
