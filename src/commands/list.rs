//! Implementation of the `advlock list` command.

use super::target::key_of;
use crate::cli::ListArgs;
use advlock::error::Result;
use advlock::lockf::LockEngine;

/// Execute the `advlock list` command.
pub fn cmd_list(engine: &LockEngine, args: ListArgs) -> Result<()> {
    let key = key_of(&args.path)?;
    let mut locks = engine.remote_locks(key)?;
    locks.sort_by_key(|l| (l.range.start, l.owner));

    if locks.is_empty() {
        println!("No active locks on {}.", args.path.display());
        return Ok(());
    }

    println!("Active locks on {} ({}):", args.path.display(), locks.len());
    println!();
    for lock in &locks {
        println!("  {} {} {}:", lock.universe, lock.kind, lock.range);
        println!("    Owner:      {:#x}", lock.owner);
        println!("    Holder PID: {}", lock.holder_pid);
        println!();
    }
    Ok(())
}
