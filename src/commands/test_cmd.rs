//! Implementation of the `advlock test` command.

use super::target::Target;
use crate::cli::TestArgs;
use advlock::error::Result;
use advlock::lockf::{Flock, LockEngine, LockKind, LockOp, Universe, Whence};

/// Execute the `advlock test` command: an `F_GETLK` query.
pub fn cmd_test(engine: &LockEngine, args: TestArgs) -> Result<()> {
    let range = &args.range;
    let target = Target::open(&range.path, false, engine)?;
    let universe = if range.flock {
        Universe::Flock
    } else {
        Universe::Posix
    };

    let mut fl = if range.flock {
        Flock::whole_file(range.kind.into())
    } else {
        Flock::new(range.kind.into(), Whence::Set, range.start, range.len)
    };
    engine.lock(LockOp::GetLk, &mut fl, universe, &target.open)?;

    println!("{}", describe(&fl));
    Ok(())
}

/// Human-readable form of an `F_GETLK` result.
pub fn describe(fl: &Flock) -> String {
    if fl.kind == LockKind::Unlock {
        return "unlocked".to_string();
    }
    let extent = if fl.len == 0 {
        format!("[{}, EOF)", fl.start)
    } else {
        format!("[{}, {}]", fl.start, fl.start + fl.len - 1)
    };
    let holder = if fl.pid < 0 {
        "another open file (flock)".to_string()
    } else {
        format!("pid {}", fl.pid)
    };
    format!("{} lock on {} held by {}", fl.kind, extent, holder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_unlocked() {
        assert_eq!(describe(&Flock::whole_file(LockKind::Unlock)), "unlocked");
    }

    #[test]
    fn describe_posix_conflict() {
        let mut fl = Flock::new(LockKind::Write, Whence::Set, 10, 5);
        fl.pid = 4242;
        assert_eq!(describe(&fl), "write lock on [10, 14] held by pid 4242");
    }

    #[test]
    fn describe_flock_conflict() {
        let mut fl = Flock::whole_file(LockKind::Read);
        fl.pid = -1;
        assert_eq!(
            describe(&fl),
            "read lock on [0, EOF) held by another open file (flock)"
        );
    }
}
