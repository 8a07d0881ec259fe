//! Error kinds raised by the epoch subsystem.

use core::fmt::{self, Display, Formatter};

/// Failure modes of the epoch subsystem.
///
/// `OldSeesNew` and `EpochVerify` are expected, retryable outcomes of ordinary contention; the
/// rest indicate misuse or unrecoverable durable state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochSysError {
    /// A data-structure-facing call was made with no op frame open on the calling thread.
    NotInOp,
    /// `open_read` found only versions newer than the frame's epoch; the caller must abort and
    /// retry in a later epoch.
    OldSeesNew,
    /// `load_verify` (visible-read configuration) observed the epoch clock advance out from under
    /// it; the caller must retry.
    EpochVerify,
    /// The persistent chunk allocator (C1) returned no memory.
    AllocFailure,
    /// Inconsistent durable state was found during recovery (duplicate `id` at the same
    /// `birth_epoch`, bad superblock magic, a truncated chunk).
    RecoveryCorruption,
    /// A programming error: unbalanced `begin_op`/`end_op`, or an operation on a PBlk the calling
    /// thread does not own.
    UsageBug(&'static str),
}

impl EpochSysError {
    /// Kinds 2 and 3: recoverable by re-running the op-frame retry loop.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, EpochSysError::OldSeesNew | EpochSysError::EpochVerify)
    }

    /// Kind 5: no partial-recovery mode is offered, this always ends the recovery attempt.
    #[inline]
    pub fn is_fatal_to_recovery(&self) -> bool {
        matches!(self, EpochSysError::RecoveryCorruption)
    }
}

impl Display for EpochSysError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EpochSysError::NotInOp => write!(f, "called outside of an open op frame"),
            EpochSysError::OldSeesNew => {
                write!(f, "open_read observed only versions newer than the frame's epoch")
            }
            EpochSysError::EpochVerify => write!(f, "epoch advanced during a verified read"),
            EpochSysError::AllocFailure => write!(f, "persistent chunk allocation failed"),
            EpochSysError::RecoveryCorruption => {
                write!(f, "durable state is corrupt, recovery cannot proceed")
            }
            EpochSysError::UsageBug(why) => write!(f, "usage bug: {}", why),
        }
    }
}

impl std::error::Error for EpochSysError {}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, EpochSysError>;
