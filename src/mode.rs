//! The two modes `EpochSys` can run in.

/// Online operation versus post-crash reconstruction.
///
/// Transitions between the two are explicit and one-directional for the lifetime of a process:
/// `recover_mode` runs [`crate::recovery::recover`] to completion, which switches the subsystem to
/// `Online` as its last step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Normal operation: `begin_op`/`end_op` and friends are available.
    Online,
    /// Post-restart reconstruction: only [`crate::recovery::recover`] may run.
    Recover,
}
