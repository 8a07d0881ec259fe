//! Configuration knobs recognized by [`crate::epochsys::EpochSys::init`].
//!
//! Mirrors the source's environment-variable key/value map (§9 design notes) as an enumerated
//! record instead, so every configuration is representable at compile time and invalid
//! combinations are rejected by the type system rather than by string parsing.

/// Selects which [`crate::internal::advance::Advancer`] variant closes epochs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// A single mutex serializes `begin_op`, `end_op`, and advance.
    Blocking,
    /// `begin_op`/`end_op` are lock-free; advance is optimistic and may be performed by any
    /// thread that observes the epoch is ready to close.
    Nonblocking,
}

/// Which cache-line writeback instruction `pflush` is built on.
///
/// The protocol is identical for every choice; only the per-byte durability cost differs. This is
/// forwarded to the [`crate::chunk::ChunkAllocator`] implementation, which is the only component
/// that actually executes the instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PwbKind {
    /// `CLFLUSH` — flushes and evicts the line, ordered with respect to other `CLFLUSH`es only by
    /// a fence.
    Clflush,
    /// `CLFLUSHOPT` — like `CLFLUSH` but weakly ordered; requires `pfence` between the flush and
    /// any dependent publish.
    Clflushopt,
    /// `CLWB` — writes back without evicting, leaving the line in a clean state in cache.
    Clwb,
}

/// Runtime configuration of an [`crate::epochsys::EpochSys`].
#[derive(Clone, Copy, Debug)]
pub struct EpochSysConfig {
    /// Advancer variant (§4.6).
    pub liveness: Liveness,
    /// Advance once per `2^epoch_freq_log2` op ends, globally. The source leaves the default
    /// unspecified; this crate defaults to `6` (every 64 op ends), chosen to keep pending sets
    /// bounded without flushing on every single commit.
    pub epoch_freq_log2: u8,
    /// Visible-read configuration of `lin_var::load_verify` (§6, §9 open question). `false`
    /// (invisible reads) is the default: `load_verify` never raises `EpochVerify` and never
    /// bumps `cnt` on a plain load, trading a silently-returned pre-advance value for fewer
    /// retries. `true` makes every `load_verify` visible (bumps `cnt`) and fails with
    /// `EpochVerify` if the epoch moved during the read.
    pub visible_reads: bool,
    /// Durability primitive used by the configured [`crate::chunk::ChunkAllocator`].
    pub pwb_kind: PwbKind,
    /// Number of worker threads that will call `thread_init`.
    pub n_threads: usize,
}

impl EpochSysConfig {
    /// A config with reasonable defaults for the given thread count.
    pub fn new(n_threads: usize) -> Self {
        EpochSysConfig {
            liveness: Liveness::Nonblocking,
            epoch_freq_log2: 6,
            visible_reads: cfg!(feature = "visible-read"),
            pwb_kind: PwbKind::Clwb,
            n_threads,
        }
    }

    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_epoch_freq_log2(mut self, epoch_freq_log2: u8) -> Self {
        self.epoch_freq_log2 = epoch_freq_log2;
        self
    }

    pub fn with_visible_reads(mut self, visible_reads: bool) -> Self {
        self.visible_reads = visible_reads;
        self
    }

    pub fn with_pwb_kind(mut self, pwb_kind: PwbKind) -> Self {
        self.pwb_kind = pwb_kind;
        self
    }

    /// Number of op ends between advance attempts.
    #[inline]
    pub fn epoch_freq(&self) -> u64 {
        1 << self.epoch_freq_log2
    }
}
