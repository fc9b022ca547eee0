//! errno values reported by the locking front ends.
//!
//! The numbers follow the Linux ABI so callers translating a
//! [`LockError`](crate::error::LockError) into a C return value get the
//! codes `fcntl(2)`, `lockf(3)` and `flock(2)` document.

/// Interrupted system call.
pub const EINTR: i32 = 4;

/// Input/output error (a file could not be opened or inspected).
pub const EIO: i32 = 5;

/// Bad file descriptor (lock type not permitted by the open mode).
pub const EBADF: i32 = 9;

/// Resource temporarily unavailable (non-blocking request would block).
pub const EAGAIN: i32 = 11;

/// Same value as `EAGAIN`; `flock(2)` documents this name.
pub const EWOULDBLOCK: i32 = EAGAIN;

/// Invalid argument.
pub const EINVAL: i32 = 22;

/// Resource deadlock would occur.
pub const EDEADLK: i32 = 35;

/// No record locks available.
pub const ENOLCK: i32 = 37;

/// Value too large for defined data type.
pub const EOVERFLOW: i32 = 75;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_distinct() {
        let codes = [EINTR, EIO, EBADF, EAGAIN, EINVAL, EDEADLK, ENOLCK, EOVERFLOW];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "errno values must be distinct");
                }
            }
        }
    }

    #[test]
    fn ewouldblock_aliases_eagain() {
        assert_eq!(EWOULDBLOCK, EAGAIN);
    }
}
