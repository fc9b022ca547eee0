//! `fcntl`, `flock` and `lockf` front ends.
//!
//! Thin adapters that turn each call's arguments into a [`Flock`] and a
//! universe for [`LockEngine::lock`].

use super::engine::LockEngine;
use super::types::{Flock, LockKind, LockOp, OpenFile, Universe, Whence};
use crate::error::{LockError, Result};

/// Shared lock.
pub const LOCK_SH: i32 = 1;
/// Exclusive lock.
pub const LOCK_EX: i32 = 2;
/// Don't block when locking.
pub const LOCK_NB: i32 = 4;
/// Unlock.
pub const LOCK_UN: i32 = 8;

/// Unlock a section.
pub const F_ULOCK: i32 = 0;
/// Lock a section, waiting if needed.
pub const F_LOCK: i32 = 1;
/// Lock a section, failing if it is locked.
pub const F_TLOCK: i32 = 2;
/// Test a section for locks held by others.
pub const F_TEST: i32 = 3;

impl LockEngine {
    /// `fcntl(fd, cmd, fl)` for `F_GETLK`, `F_SETLK` and `F_SETLKW`.
    pub fn fcntl(&self, file: &OpenFile, cmd: LockOp, fl: &mut Flock) -> Result<()> {
        if cmd == LockOp::Unlock {
            return Err(LockError::InvalidRange(
                "not an fcntl lock command".to_string(),
            ));
        }
        self.lock(cmd, fl, Universe::Posix, file)
    }

    /// `flock(fd, operation)`: whole-file lock owned by the open file
    /// description.
    pub fn flock(&self, file: &OpenFile, operation: i32) -> Result<()> {
        let wait = operation & LOCK_NB == 0;
        let kind = match operation & !LOCK_NB {
            LOCK_SH => LockKind::Read,
            LOCK_EX => LockKind::Write,
            LOCK_UN => LockKind::Unlock,
            _ => {
                return Err(LockError::InvalidRange(format!(
                    "flock operation {:#x}",
                    operation
                )));
            }
        };
        let op = if wait { LockOp::SetLkW } else { LockOp::SetLk };
        let mut fl = Flock::whole_file(kind);
        self.lock(op, &mut fl, Universe::Flock, file)
    }

    /// `lockf(fd, function, size)`: `size` bytes from the current position;
    /// 0 means to end of file, negative sizes lock backwards.
    pub fn lockf(&self, file: &OpenFile, function: i32, size: i64) -> Result<()> {
        let mut fl = Flock::new(LockKind::Write, Whence::Cur, 0, size);
        let op = match function {
            F_ULOCK => {
                fl.kind = LockKind::Unlock;
                LockOp::SetLk
            }
            F_LOCK => LockOp::SetLkW,
            F_TLOCK => LockOp::SetLk,
            F_TEST => {
                // Our own locks never conflict, so anything reported is someone else's.
                self.lock(LockOp::GetLk, &mut fl, Universe::Flock, file)?;
                return if fl.kind == LockKind::Unlock {
                    Ok(())
                } else {
                    Err(LockError::WouldBlock)
                };
            }
            _ => {
                return Err(LockError::InvalidRange(format!(
                    "lockf function {}",
                    function
                )));
            }
        };
        self.lock(op, &mut fl, Universe::Flock, file)
    }
}
