//! `EpochSys`: the orchestrator tying the clock, reservations, pending sets, descriptor pool, and
//! chunk allocator into the subsystem described by §4 as a whole.
//!
//! A process constructs exactly one `EpochSys` (typically behind a `std::sync::OnceLock` or an
//! `Arc`, left to the caller rather than imposed here - this subsystem's state is genuinely global
//! rather than per-thread, so a plain shared reference is the natural fit) and hands each worker
//! thread a stable `tid` via `thread_init`.

use crate::{
    chunk::ChunkAllocator,
    config::{EpochSysConfig, Liveness},
    error::{EpochSysError, Result},
    internal::{
        advance::{Advancer, BlockingAdvancer, NonblockingAdvancer},
        epoch::{AtomicEpoch, Epoch, EpochClock},
        pending::PendingSets,
        reservation::ReservationTable,
    },
    mode::Mode,
    recovery::{self, RecoveredPblk},
    sc_desc::ScDescTable,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::atomic::{AtomicU64, AtomicU8, Ordering::*},
};

/// The top-level, process-wide handle onto the epoch subsystem.
pub struct EpochSys {
    config: EpochSysConfig,
    mode: AtomicU8,
    clock: EpochClock,
    durable_epoch: AtomicEpoch,
    reservations: ReservationTable,
    pending: PendingSets,
    sc_desc: ScDescTable,
    allocator: Box<dyn ChunkAllocator>,
    advancer: Box<dyn Advancer>,
    ops_since_advance: AtomicU64,
}

impl Debug for EpochSys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochSys")
            .field("config", &self.config)
            .field("mode", &self.mode())
            .field("clock", &self.clock)
            .field("durable_epoch", &self.durable_epoch())
            .finish_non_exhaustive()
    }
}

impl EpochSys {
    /// Cold-start construction: no recovery is performed, `durable_epoch` starts at `Epoch::NULL`.
    /// Use [`EpochSys::recover`] instead when resuming over chunks from a previous process.
    pub fn init(config: EpochSysConfig, allocator: Box<dyn ChunkAllocator>) -> Self {
        let advancer: Box<dyn Advancer> = match config.liveness {
            Liveness::Blocking => Box::new(BlockingAdvancer::default()),
            Liveness::Nonblocking => Box::new(NonblockingAdvancer),
        };
        EpochSys {
            reservations: ReservationTable::new(config.n_threads),
            sc_desc: ScDescTable::new(config.n_threads),
            pending: PendingSets::new(),
            clock: EpochClock::new(),
            durable_epoch: AtomicEpoch::new(Epoch::NULL),
            mode: AtomicU8::new(Mode::Online as u8),
            allocator,
            advancer,
            config,
            ops_since_advance: AtomicU64::new(0),
        }
    }

    /// Walks `allocator`'s surviving chunks as of `durable_epoch` (§4.9) and returns a fresh,
    /// `Online`-mode `EpochSys` alongside the PBlks that survived. `durable_epoch` must come from
    /// wherever the application anchors its last known-durable epoch (e.g. a root PBlk); this
    /// subsystem does not itself persist a superblock.
    pub fn recover(
        config: EpochSysConfig,
        allocator: Box<dyn ChunkAllocator>,
        durable_epoch: Epoch,
    ) -> Result<(Self, Vec<RecoveredPblk>)> {
        let recovered = recovery::recover(allocator.as_ref(), config.n_threads, durable_epoch)?;
        let epoch_sys = Self::init(config, allocator);
        epoch_sys.durable_epoch.store(durable_epoch, Release);
        Ok((epoch_sys, recovered))
    }

    /// Validates that `tid` is in range for the thread count this subsystem was configured with.
    /// Callers pick `tid` once per worker thread (e.g. from a thread pool index) and reuse it for
    /// every subsequent `begin_op`.
    pub fn thread_init(&self, tid: usize) -> Result<()> {
        if tid < self.reservations.len() {
            Ok(())
        } else {
            Err(EpochSysError::UsageBug(
                "tid out of range for the n_threads this EpochSys was configured with",
            ))
        }
    }

    #[inline]
    pub fn config(&self) -> &EpochSysConfig {
        &self.config
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        match self.mode.load(Acquire) {
            v if v == Mode::Online as u8 => Mode::Online,
            _ => Mode::Recover,
        }
    }

    /// `recover_mode()` (§6): true while post-restart reconstruction is still in progress. Only
    /// [`recovery::recover`] may run while this holds.
    #[inline]
    pub fn recover_mode(&self) -> bool {
        self.mode() == Mode::Recover
    }

    /// `online_mode()` (§6): true once the subsystem has returned to (or started in) normal
    /// operation and `begin_op`/`end_op`/friends are available.
    #[inline]
    pub fn online_mode(&self) -> bool {
        self.mode() == Mode::Online
    }

    #[inline]
    pub(crate) fn clock(&self) -> &EpochClock {
        &self.clock
    }

    #[inline]
    pub(crate) fn reservations(&self) -> &ReservationTable {
        &self.reservations
    }

    #[inline]
    pub(crate) fn pending(&self) -> &PendingSets {
        &self.pending
    }

    #[inline]
    pub(crate) fn sc_desc(&self) -> &ScDescTable {
        &self.sc_desc
    }

    #[inline]
    pub(crate) fn allocator(&self) -> &dyn ChunkAllocator {
        self.allocator.as_ref()
    }

    #[inline]
    pub fn durable_epoch(&self) -> Epoch {
        self.durable_epoch.load(Acquire)
    }

    /// Frees every PBlk this frame allocated but never published - the `abort_op` path, also
    /// exercised by `OpFrame`'s `Drop` impl as a last resort.
    pub(crate) fn take_in_construction_and_free(&self, epoch: Epoch) {
        for pending in self.pending.take_in_construction(epoch.slot()) {
            unsafe { self.allocator.pfree(pending.ptr, pending.size) };
        }
    }

    /// Called at the end of every outermost `end_op`/`end_readonly_op`: every
    /// `EpochSysConfig::epoch_freq` op ends, attempts an advance. A successful advance drains the
    /// now-closed epoch's `to_persist` set (flush + fence) and, once no reservation can still
    /// observe it, its `to_retire` set (free).
    pub(crate) fn maybe_advance(&self) {
        let count = self.ops_since_advance.fetch_add(1, Relaxed) + 1;
        if count % self.config.epoch_freq() != 0 {
            return;
        }
        if let Some(closed_epoch) = self.advancer.try_advance(&self.clock, &self.reservations) {
            self.drain_closed_epoch(closed_epoch.get().saturating_sub(1));
        }
    }

    fn drain_closed_epoch(&self, closed: u64) {
        let epoch = Epoch::new(closed);
        let slot = epoch.slot();

        let mut bytes = 0usize;
        self.pending.drain_to_persist(slot, |pblk| {
            self.allocator.pflush(pblk.ptr, pblk.size);
            bytes += pblk.size;
        });
        self.allocator.pfence();
        pds_stats::bytes_flushed(bytes);
        self.durable_epoch.store(epoch, Release);

        self.reservations.quiesce(epoch);
        self.pending.drain_to_retire(slot, |pblk| {
            unsafe { self.allocator.pfree(pblk.ptr, pblk.size) };
            pds_stats::pblks_reclaimed();
        });
    }

    /// Test/harness entry point (§ supplemented features): force-drains the current epoch's
    /// `to_persist` set without advancing past it. Never touches `to_retire` - retirement is only
    /// safe once the epoch is closed and quiesced.
    #[cfg(any(test, feature = "simulate-crash"))]
    pub fn flush(&self) {
        let slot = self.clock.now().slot();
        let mut bytes = 0usize;
        self.pending.drain_to_persist(slot, |pblk| {
            self.allocator.pflush(pblk.ptr, pblk.size);
            bytes += pblk.size;
        });
        self.allocator.pfence();
        pds_stats::bytes_flushed(bytes);
    }

    /// Test/harness entry point: discards every volatile structure a real crash would lose
    /// (pending sets, in-flight descriptors are simply abandoned) without touching the durable
    /// chunks `allocator` holds. Callers then reconstruct via `EpochSys::recover` against the same
    /// allocator to exercise the post-crash path within one process.
    #[cfg(any(test, feature = "simulate-crash"))]
    pub fn simulate_crash(&self) {
        self.mode.store(Mode::Recover as u8, Release);
        for slot in 0..4 {
            self.pending.drain_to_persist(slot, |_| {});
            let _ = self.pending.take_in_construction(slot);
            self.pending.drain_to_retire(slot, |_| {});
        }
    }
}
