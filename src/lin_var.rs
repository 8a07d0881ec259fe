//! The 128-bit linearization word (C7): `{raw, cnt}`, atomically loaded/stored/CAS'd as one unit.
//!
//! No stable `std` atomic covers 128 bits (and no stable DWCAS), so this leans on `portable-atomic`
//! the way the pack uses it elsewhere for wide atomics - rather than hand-rolling a CAS-loop
//! emulation, which is exactly the kind of "fall back to stdlib" move these notes warn against.
//!
//! `cnt`'s low bit is the descriptor-installed flag (`DESC_FLAG`): `0` means `raw` is a plain,
//! directly-readable value; `1` means `raw` holds `tid + 1` for the `ScDescTable` slot currently
//! completing a CAS against this word. A plain-to-plain CAS (`cas`, or the HTM fast path) advances
//! `cnt` by `4`; an install-then-cleanup descriptor round trip advances it by `2` per half (install,
//! then settle). Either way a stable value always has an even `cnt`.

use crate::{
    epochsys::EpochSys,
    error::{EpochSysError, Result},
    op_frame::OpFrame,
    sc_desc::{DescStatus, ScDescView},
};
use pds_htm::HardwareTx;
use portable_atomic::AtomicU128;
use std::sync::atomic::Ordering::*;

const DESC_FLAG: u64 = 1;
const MAX_HTM_RETRIES: u32 = 3;

/// A point-in-time read of a `LinVar`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LinSnapshot {
    raw: u64,
    cnt: u64,
}

impl LinSnapshot {
    #[inline]
    pub fn raw(&self) -> u64 {
        self.raw
    }

    #[inline]
    pub fn cnt(&self) -> u64 {
        self.cnt
    }

    #[inline]
    pub fn has_descriptor(&self) -> bool {
        self.cnt & DESC_FLAG != 0
    }

    /// The `tid` of the descriptor slot completing this word, if one is installed.
    #[inline]
    pub fn descriptor_tid(&self) -> Option<usize> {
        self.has_descriptor().then(|| (self.raw as usize) - 1)
    }
}

#[inline]
fn pack(raw: u64, cnt: u64) -> u128 {
    ((cnt as u128) << 64) | raw as u128
}

#[inline]
fn unpack(bits: u128) -> LinSnapshot {
    LinSnapshot {
        raw: bits as u64,
        cnt: (bits >> 64) as u64,
    }
}

/// The 128-bit indirection word itself.
#[derive(Debug)]
pub struct LinVar(AtomicU128);

impl LinVar {
    pub fn new(raw: u64) -> Self {
        LinVar(AtomicU128::new(pack(raw, 0)))
    }

    #[inline]
    fn address(&self) -> usize {
        &self.0 as *const AtomicU128 as usize
    }

    /// `load` (§4.7): a plain read. If a descriptor is mid-flight, this returns the descriptor's
    /// placeholder snapshot - callers that need the settled value should prefer `load_verify`.
    #[inline]
    pub fn load(&self, ordering: std::sync::atomic::Ordering) -> LinSnapshot {
        unpack(self.0.load(ordering))
    }

    /// `load_verify` (§4.7, §9 open question): in the visible-read configuration
    /// (`EpochSysConfig::visible_reads`), returns `Err(EpochVerify)` if the epoch has moved on
    /// since `op` was opened, and otherwise best-effort bumps `cnt` by `2` to announce the read to
    /// any concurrent writer (a pure CAS that only ever fails harmlessly if it loses the race). In
    /// the default invisible-read configuration this is identical to `load`: the epoch is never
    /// consulted, so a concurrent advance is silently tolerated and `EpochVerify` is never raised.
    pub fn load_verify(&self, op: &OpFrame) -> Result<LinSnapshot> {
        if !op.epoch_sys.config().visible_reads {
            return Ok(self.resolve(op.epoch_sys));
        }
        if !op.epoch_sys.clock().check(op.epoch()) {
            pds_stats::epoch_verify_retries();
            return Err(EpochSysError::EpochVerify);
        }
        let snapshot = self.resolve(op.epoch_sys);
        let _ = self.0.compare_exchange_weak(
            pack(snapshot.raw, snapshot.cnt),
            pack(snapshot.raw, snapshot.cnt.wrapping_add(2)),
            AcqRel,
            Relaxed,
        );
        Ok(snapshot)
    }

    /// A direct, non-CAS write. Only safe when the caller already holds exclusive access to the
    /// slot (e.g. a freshly `register_alloc`'d `Pblk`'s indirection word before publication).
    pub fn store(&self, raw: u64) {
        let prev = unpack(self.0.load(Acquire));
        self.0.store(pack(raw, prev.cnt.wrapping_add(2)), Release);
    }

    /// `CAS` (§4.7): a plain hardware CAS for non-linearizing administrative swaps - never
    /// consults the epoch, never installs a descriptor. Succeeds iff the word still reads exactly
    /// `expected` (both halves), in which case `cnt` advances by `4` (plain-to-plain, twice the
    /// granularity a descriptor round trip uses, since no helper needs to observe an intermediate
    /// state). Callers that might race a concurrent descriptor install should `load`/`resolve`
    /// first - this does not help a pending descriptor itself.
    pub fn cas(&self, expected: LinSnapshot, desired_raw: u64) -> bool {
        self.0
            .compare_exchange(
                pack(expected.raw, expected.cnt),
                pack(desired_raw, expected.cnt.wrapping_add(4)),
                AcqRel,
                Relaxed,
            )
            .is_ok()
    }

    /// If `snapshot` has a descriptor installed, drives it to completion (helping, per §4.8, if
    /// another thread installed it) and returns the settled snapshot. Otherwise returns
    /// `snapshot` unchanged.
    ///
    /// Completion always goes through `ScDescTable::decide` first, which is where the
    /// epoch-verify linearization check actually happens (§4.8): a helper arriving late enough
    /// that the epoch has moved on since the descriptor was installed aborts it and restores
    /// `old_raw`, rather than blindly writing `new_raw`.
    fn resolve(&self, epoch_sys: &EpochSys) -> LinSnapshot {
        loop {
            let snapshot = unpack(self.0.load(Acquire));
            let Some(tid) = snapshot.descriptor_tid() else {
                return snapshot;
            };
            let Some(view) = epoch_sys.sc_desc().view(tid, self.address()) else {
                // Descriptor already retired by its owner; reload, it should be settled now.
                continue;
            };
            let decided = epoch_sys.sc_desc().decide(tid, epoch_sys.clock());
            if self.complete(&snapshot, decided, &view) {
                epoch_sys.sc_desc().record_helped();
            }
        }
    }

    fn complete(&self, installed: &LinSnapshot, decided: DescStatus, view: &ScDescView) -> bool {
        let settled_raw = match decided {
            DescStatus::Committed => view.new_raw,
            DescStatus::Aborted => view.old_raw,
            DescStatus::InProgress => unreachable!("decide always returns a terminal status"),
        };
        let completed = pack(settled_raw, view.completed_cnt);
        self.0
            .compare_exchange(pack(installed.raw, installed.cnt), completed, AcqRel, Relaxed)
            .is_ok()
    }

    /// `CAS_verify` (§4.7/§9): the verified compare-and-swap every SC descriptor and data
    /// structure builds on. Checks `op`'s epoch is still current, then attempts the swap via the
    /// hardware transactional memory fast path, falling back to the software descriptor protocol
    /// (`sc_desc.rs`) on repeated HTM abort.
    ///
    /// Returns `Ok(true)` if this call's swap committed, `Ok(false)` if `expected_raw` was stale or
    /// the epoch moved on before the software descriptor could be decided (either way the caller
    /// should reload and retry), or `Err(EpochVerify)` if the epoch had already moved on before the
    /// attempt even began.
    pub fn cas_verify(&self, op: &OpFrame<'_>, expected_raw: u64, new_raw: u64) -> Result<bool> {
        if !op.epoch_sys.clock().check(op.epoch()) {
            pds_stats::epoch_verify_retries();
            return Err(EpochSysError::EpochVerify);
        }

        let settled = self.resolve(op.epoch_sys);
        if settled.raw != expected_raw {
            return Ok(false);
        }

        if let Some(committed) = self.try_htm(settled, new_raw) {
            return Ok(committed);
        }

        Ok(self.cas_software(op, settled, new_raw))
    }

    fn try_htm(&self, settled: LinSnapshot, new_raw: u64) -> Option<bool> {
        pds_stats::htm_cas_attempted();
        let mut retries = 0u32;
        let tx = unsafe {
            HardwareTx::begin(|_code| {
                retries += 1;
                retries <= MAX_HTM_RETRIES
            })
        }?;
        let current = unpack(self.0.load(Relaxed));
        let committed = current == settled;
        if committed {
            self.0
                .store(pack(new_raw, settled.cnt.wrapping_add(4)), Relaxed);
        }
        drop(tx);
        if committed {
            pds_stats::htm_cas_committed();
        }
        Some(committed)
    }

    fn cas_software(&self, op: &OpFrame<'_>, settled: LinSnapshot, new_raw: u64) -> bool {
        let tid = op.tid();
        let completed_cnt = settled.cnt.wrapping_add(2);
        let descriptor_raw = op.epoch_sys.sc_desc().install(
            tid,
            self.address(),
            settled.raw,
            new_raw,
            completed_cnt,
            op.epoch(),
        );

        let install_bits = pack(descriptor_raw, settled.cnt.wrapping_add(1));
        let installed = self
            .0
            .compare_exchange(
                pack(settled.raw, settled.cnt),
                install_bits,
                AcqRel,
                Relaxed,
            )
            .is_ok();
        if !installed {
            op.epoch_sys.sc_desc().retire(tid);
            return false;
        }

        // The epoch-verify decision (§4.8) happens here, against the live clock - not against
        // `op.epoch()` as observed before install. A helper racing to complete this same
        // descriptor calls the identical `decide`, so whichever of them gets there first settles
        // it for both.
        let decided = op.epoch_sys.sc_desc().decide(tid, op.epoch_sys.clock());
        let view = op
            .epoch_sys
            .sc_desc()
            .view(tid, self.address())
            .expect("this thread installed the descriptor, it must still be visible");
        let settled_raw = match decided {
            DescStatus::Committed => view.new_raw,
            DescStatus::Aborted => view.old_raw,
            DescStatus::InProgress => unreachable!("decide always returns a terminal status"),
        };
        let _ = self.0.compare_exchange(
            install_bits,
            pack(settled_raw, completed_cnt),
            AcqRel,
            Relaxed,
        );
        // Whether this thread's own completing CAS won or a helper's did, the word now reads
        // `settled_raw` either way, so the outcome this thread reports is correct regardless.
        op.epoch_sys.sc_desc().retire(tid);
        matches!(decided, DescStatus::Committed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let bits = pack(0xdead_beef, 7);
        let snapshot = unpack(bits);
        assert_eq!(snapshot.raw(), 0xdead_beef);
        assert_eq!(snapshot.cnt(), 7);
    }

    #[test]
    fn fresh_lin_var_has_no_descriptor() {
        let var = LinVar::new(42);
        let snapshot = var.load(Acquire);
        assert_eq!(snapshot.raw(), 42);
        assert!(!snapshot.has_descriptor());
    }

    #[test]
    fn store_bumps_cnt_by_two() {
        let var = LinVar::new(1);
        var.store(2);
        var.store(3);
        assert_eq!(var.load(Acquire).cnt(), 4);
    }

    #[test]
    fn cas_succeeds_on_match_and_bumps_cnt_by_four() {
        let var = LinVar::new(1);
        let snapshot = var.load(Acquire);
        assert!(var.cas(snapshot, 2));
        let settled = var.load(Acquire);
        assert_eq!(settled.raw(), 2);
        assert_eq!(settled.cnt(), snapshot.cnt() + 4);
    }

    #[test]
    fn cas_fails_on_stale_expected() {
        let var = LinVar::new(1);
        let stale = var.load(Acquire);
        var.store(2);
        assert!(!var.cas(stale, 3));
        assert_eq!(var.load(Acquire).raw(), 2);
    }
}
