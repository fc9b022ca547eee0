//! Error types for the advisory locking engine.
//!
//! Uses thiserror for derive macros. Every variant maps onto the errno a
//! POSIX caller of `fcntl`/`lockf`/`flock` expects.

use crate::errno;
use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Negative or otherwise malformed range, or an unknown operation.
    #[error("invalid lock request: {0}")]
    InvalidRange(String),

    /// Range end does not fit in a file offset.
    #[error("lock range overflows the file offset type: {0}")]
    Overflow(String),

    /// Lock type not permitted by the descriptor's open mode.
    #[error("lock type not permitted by the file's open mode")]
    WrongAccessMode,

    /// A conflicting lock is held and the request was non-blocking.
    #[error("lock is held by another owner")]
    WouldBlock,

    /// Waiting could deadlock.
    #[error("resource deadlock would occur")]
    Deadlock,

    /// A signal arrived while waiting for the lock.
    #[error("interrupted while waiting for lock")]
    Interrupted,

    /// No memory left for lock records.
    #[error("no record locks available")]
    ResourceExhausted,

    /// The host synchronization object layer failed.
    #[error("synchronization object failure: {0}")]
    SyncPrimitiveFailure(String),

    /// Configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file named on the command line could not be opened or inspected.
    #[error("I/O error: {0}")]
    Io(String),
}

impl LockError {
    /// Returns the errno reported to POSIX callers for this error.
    ///
    /// A host synchronization failure means safety of proceeding can't be
    /// verified, so it is reported as `EDEADLK`.
    pub fn errno(&self) -> i32 {
        match self {
            LockError::InvalidRange(_) => errno::EINVAL,
            LockError::Overflow(_) => errno::EOVERFLOW,
            LockError::WrongAccessMode => errno::EBADF,
            LockError::WouldBlock => errno::EAGAIN,
            LockError::Deadlock => errno::EDEADLK,
            LockError::Interrupted => errno::EINTR,
            LockError::ResourceExhausted => errno::ENOLCK,
            LockError::SyncPrimitiveFailure(_) => errno::EDEADLK,
            LockError::Config(_) => errno::EINVAL,
            LockError::Io(_) => errno::EIO,
        }
    }

    pub(crate) fn sync(context: &str, err: impl std::fmt::Display) -> Self {
        LockError::SyncPrimitiveFailure(format!("{}: {}", context, err))
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_eagain() {
        assert_eq!(LockError::WouldBlock.errno(), errno::EAGAIN);
    }

    #[test]
    fn sync_failure_is_reported_as_deadlock() {
        let err = LockError::sync("open process", "access denied");
        assert_eq!(err.errno(), errno::EDEADLK);
        assert_eq!(
            err.to_string(),
            "synchronization object failure: open process: access denied"
        );
    }

    #[test]
    fn range_errors_have_distinct_codes() {
        assert_eq!(
            LockError::InvalidRange("negative start".into()).errno(),
            errno::EINVAL
        );
        assert_eq!(
            LockError::Overflow("start + len".into()).errno(),
            errno::EOVERFLOW
        );
    }

    #[test]
    fn remaining_kinds_map_to_posix_codes() {
        assert_eq!(LockError::WrongAccessMode.errno(), errno::EBADF);
        assert_eq!(LockError::Deadlock.errno(), errno::EDEADLK);
        assert_eq!(LockError::Interrupted.errno(), errno::EINTR);
        assert_eq!(LockError::ResourceExhausted.errno(), errno::ENOLCK);
        assert_eq!(LockError::Io("data.bin".into()).errno(), errno::EIO);
    }
}
