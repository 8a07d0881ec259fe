//! The epoch advancer (C6): closes the current epoch and ticks the clock forward.
//!
//! Both variants share the same safety condition - an epoch may only close once no reservation
//! still points at or before it (§4.6) - and differ only in how eagerly they wait for that
//! condition. `Liveness::Nonblocking` gives up immediately if anyone is still behind, so
//! `end_op`'s inline advance attempt never stalls the committing thread; `Liveness::Blocking`
//! busy-waits until the condition holds, guaranteeing the epoch it started on *will* close before
//! it returns. Selected at construction via `EpochSysConfig::liveness` (§9: "two variants
//! selectable at construction"), behind one `Advancer` trait so call sites never branch on it.

use crate::internal::{
    epoch::{Epoch, EpochClock},
    reservation::ReservationTable,
};
use parking_lot::Mutex;

/// Attempts to close the epoch the clock currently reads.
pub trait Advancer: Send + Sync {
    /// Returns `Some(new_epoch)` if this call performed the advance, `None` if it declined (or
    /// lost a race to another thread).
    fn try_advance(&self, clock: &EpochClock, reservations: &ReservationTable) -> Option<Epoch>;
}

/// `Liveness::Nonblocking` (§4.6): opportunistic, lock-free, never waits.
#[derive(Default)]
pub struct NonblockingAdvancer;

impl Advancer for NonblockingAdvancer {
    fn try_advance(&self, clock: &EpochClock, reservations: &ReservationTable) -> Option<Epoch> {
        pds_stats::advances_attempted();
        let observed = clock.now();
        if reservations
            .min_reserved()
            .is_some_and(|min| min.get() <= observed.get())
        {
            return None;
        }
        match clock.try_advance(observed) {
            Ok(new_epoch) => {
                pds_stats::advances_succeeded();
                Some(new_epoch)
            }
            Err(_) => None,
        }
    }
}

/// `Liveness::Blocking` (§4.6): a single mutex serializes advance attempts, and the winning
/// thread busy-waits for every reservation to clear before ticking the clock - the guarantee a
/// data structure's caller gets is that once this returns, the epoch it observed on entry has
/// closed, not merely that someone, eventually, will close it.
pub struct BlockingAdvancer {
    lock: Mutex<()>,
}

impl Default for BlockingAdvancer {
    fn default() -> Self {
        BlockingAdvancer { lock: Mutex::new(()) }
    }
}

impl Advancer for BlockingAdvancer {
    fn try_advance(&self, clock: &EpochClock, reservations: &ReservationTable) -> Option<Epoch> {
        let _guard = self.lock.lock();
        pds_stats::advances_attempted();
        let observed = clock.now();
        if !clock.check(observed) {
            return None;
        }
        let waiting = reservations.iter().filter(|r| r.blocks(observed)).count();
        pds_stats::advance_wait_count(waiting);
        reservations.quiesce(observed);
        match clock.try_advance(observed) {
            Ok(new_epoch) => {
                pds_stats::advances_succeeded();
                Some(new_epoch)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nonblocking_declines_while_someone_is_behind() {
        let clock = EpochClock::new();
        let reservations = ReservationTable::new(1);
        reservations.get(0).pin(clock.now());
        let advancer = NonblockingAdvancer;
        assert_eq!(advancer.try_advance(&clock, &reservations), None);
    }

    #[test]
    fn nonblocking_advances_when_nobody_is_pinned() {
        let clock = EpochClock::new();
        let reservations = ReservationTable::new(1);
        let advancer = NonblockingAdvancer;
        assert!(advancer.try_advance(&clock, &reservations).is_some());
    }

    #[test]
    fn blocking_advances_after_the_pinned_thread_unpins() {
        let clock = EpochClock::new();
        let reservations = ReservationTable::new(1);
        reservations.get(0).pin(clock.now());
        reservations.get(0).unpin();
        let advancer = BlockingAdvancer::default();
        assert!(advancer.try_advance(&clock, &reservations).is_some());
    }
}
