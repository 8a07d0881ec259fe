//! The global epoch clock (C3).
//!
//! `Epoch` is the vocabulary type shared by every other component: thread reservations
//! (`internal::reservation`), pending sets (`internal::pending`), the `lin_var` indirection word,
//! and the recovery driver all compare and store `Epoch`s.
//!
//! `NULL_EPOCH` (zero) means "not reserved"/"no epoch" per spec §3. Epoch `1` is the first valid
//! epoch a thread can ever pin to, so a reservation of `0` is unambiguous.

use core::sync::atomic::{AtomicU64, Ordering};

/// The first valid epoch after `EpochClock::new()`.
pub const FIRST_EPOCH: u64 = 1;

/// A point on the global epoch clock, or the absence of one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// "No epoch" - an unreserved thread, or an unset `retire_epoch`.
    pub const NULL: Epoch = Epoch(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Epoch(value)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The epoch immediately after `self`. Saturates rather than wrapping; by the time a real
    /// process could tick `u64::MAX` times the allocator backing it will have been replaced many
    /// times over.
    #[inline]
    pub fn next(self) -> Self {
        Epoch(self.0.saturating_add(1))
    }

    /// Index into the four rotating pending-set slots (§3, §4.4).
    #[inline]
    pub fn slot(self) -> usize {
        (self.0 % 4) as usize
    }
}

impl core::fmt::Display for Epoch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_EPOCH")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// An atomic `Epoch`. Used both for the global clock and for per-thread reservations.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicEpoch(AtomicU64);

impl AtomicEpoch {
    #[inline]
    pub const fn new(epoch: Epoch) -> Self {
        AtomicEpoch(AtomicU64::new(epoch.0))
    }

    #[inline]
    pub fn load(&self, o: Ordering) -> Epoch {
        Epoch(self.0.load(o))
    }

    #[inline]
    pub fn store(&self, epoch: Epoch, o: Ordering) {
        self.0.store(epoch.0, o)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: Epoch,
        new: Epoch,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Epoch, Epoch> {
        self.0
            .compare_exchange(current.0, new.0, success, failure)
            .map(Epoch)
            .map_err(Epoch)
    }
}

/// The world clock. The single source of truth for "what epoch is it".
///
/// Unlike a plain counter, `advance` is a CAS rather than an unconditional `fetch_add`: the
/// non-blocking advancer (C6) races other threads to close an epoch, and exactly one of them
/// should win.
#[derive(Debug)]
#[repr(align(64))]
pub struct EpochClock(AtomicEpoch);

impl EpochClock {
    #[inline]
    pub const fn new() -> Self {
        EpochClock(AtomicEpoch::new(Epoch(FIRST_EPOCH)))
    }

    /// Returns the current epoch (§4.3 `check_epoch`'s raw material).
    #[inline]
    pub fn now(&self) -> Epoch {
        self.0.load(Ordering::Acquire)
    }

    /// `check_epoch(e)`: true iff the clock still reads `e`.
    #[inline]
    pub fn check(&self, e: Epoch) -> bool {
        self.now() == e
    }

    /// Attempts to move the clock from `observed` to `observed.next()`. Returns the new epoch on
    /// success, or the epoch actually observed on failure (another thread already advanced).
    #[inline]
    pub fn try_advance(&self, observed: Epoch) -> Result<Epoch, Epoch> {
        self.0
            .compare_exchange(observed, observed.next(), Ordering::AcqRel, Ordering::Acquire)
    }
}

impl Default for EpochClock {
    #[inline]
    fn default() -> Self {
        EpochClock::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_epoch_is_one() {
        let clock = EpochClock::new();
        assert_eq!(clock.now(), Epoch::new(FIRST_EPOCH));
    }

    #[test]
    fn try_advance_races() {
        let clock = EpochClock::new();
        let e0 = clock.now();
        assert_eq!(clock.try_advance(e0), Ok(e0.next()));
        // the same observed epoch can't win twice
        assert_eq!(clock.try_advance(e0), Err(e0.next()));
        assert_eq!(clock.now(), e0.next());
    }

    #[test]
    fn null_epoch_is_never_current() {
        let clock = EpochClock::new();
        assert!(!clock.check(Epoch::NULL));
    }
}
