//! Implementation of the `advlock lock` command.

use super::target::Target;
use crate::cli::{LockArgs, LockTypeArg};
use advlock::error::{LockError, Result};
use advlock::lockf::api::{LOCK_EX, LOCK_NB, LOCK_SH};
use advlock::lockf::{Flock, LockEngine, LockKind, LockOp, Whence};
use std::io::BufRead;
use std::thread;
use std::time::Duration;
use tracing::info;

impl From<LockTypeArg> for LockKind {
    fn from(arg: LockTypeArg) -> Self {
        match arg {
            LockTypeArg::Read => LockKind::Read,
            LockTypeArg::Write => LockKind::Write,
        }
    }
}

/// Execute the `advlock lock` command.
///
/// Takes the lock, holds it until Enter (or `--hold-ms`), then closes the
/// descriptor, which drops every lock taken through it.
pub fn cmd_lock(engine: &LockEngine, args: LockArgs) -> Result<()> {
    let range = &args.range;
    let kind = LockKind::from(range.kind);
    let target = Target::open(&range.path, kind == LockKind::Write, engine)?;

    if range.flock {
        let mut operation = if kind == LockKind::Write { LOCK_EX } else { LOCK_SH };
        if !args.wait {
            operation |= LOCK_NB;
        }
        engine.flock(&target.open, operation)?;
    } else {
        let op = if args.wait { LockOp::SetLkW } else { LockOp::SetLk };
        let mut fl = Flock::new(kind, Whence::Set, range.start, range.len);
        engine.fcntl(&target.open, op, &mut fl)?;
    }
    info!(path = %range.path.display(), %kind, flock = range.flock, "lock acquired");
    println!("Locked {} ({} lock)", range.path.display(), kind);

    match args.hold_ms {
        Some(ms) => thread::sleep(Duration::from_millis(ms)),
        None => {
            println!("Press Enter to release.");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| LockError::Io(format!("failed to read stdin: {}", e)))?;
        }
    }

    engine.on_descriptor_close(target.open.key, target.open.open_id, true)?;
    println!("Released.");
    Ok(())
}
