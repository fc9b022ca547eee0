//! The lock engine: request dispatch and the set/clear/get algorithms.
//!
//! Each process keeps only the locks it holds itself. Everything else is
//! learned by listing the file's namespace directory, so every conflict
//! check runs against a fresh view of all processes' locks and a loser of a
//! race sees the winner's object on its next scan.

use super::domain::{DomainGuard, DomainRegistry, HeldLock, publish_pending};
use super::name::{object_name, parse_object_name};
use super::namespace::{DirHandle, LockNamespace, Wake};
use super::pool::Spare;
use super::range::{OwnerFilter, Overlap, first_conflict, first_overlap, resolve};
use super::signal::{Disposition, Signals};
use super::types::{
    FileKey, Flock, LockKind, LockOp, LockRange, LockRecord, OpenFile, ProcessIdentity, Universe,
    Whence,
};
use crate::config::Config;
use crate::error::{LockError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace};

/// Advisory lock manager of one process.
#[derive(Debug)]
pub struct LockEngine {
    pub(crate) namespace: Arc<dyn LockNamespace>,
    pub(crate) registry: DomainRegistry,
    pub(crate) identity: ProcessIdentity,
    pub(crate) signals: Arc<Signals>,
    pub(crate) config: Config,
    open_seq: AtomicU32,
}

impl LockEngine {
    pub fn new(namespace: Arc<dyn LockNamespace>, identity: ProcessIdentity, config: Config) -> Self {
        Self {
            registry: DomainRegistry::new(Arc::clone(&namespace), identity.holder_pid),
            namespace,
            identity,
            signals: Arc::new(Signals::new()),
            config,
            open_seq: AtomicU32::new(0),
        }
    }

    /// Use `signals` as this process's signal state.
    pub fn with_signals(mut self, signals: Arc<Signals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh open file description id: `(holder_pid << 32) | sequence`.
    pub fn new_open_file_id(&self) -> u64 {
        let seq = self.open_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        (u64::from(self.identity.holder_pid) << 32) | u64::from(seq)
    }

    /// Apply `op` to the lock described by `fl` on `file`.
    ///
    /// `universe` selects POSIX (`fcntl`) or FLOCK (`flock`/`lockf`)
    /// semantics. For [`LockOp::GetLk`], `fl` is overwritten with the first
    /// conflicting lock, or its type is set to [`LockKind::Unlock`].
    pub fn lock(&self, op: LockOp, fl: &mut Flock, universe: Universe, file: &OpenFile) -> Result<()> {
        let op = match (op, fl.kind) {
            (LockOp::SetLk | LockOp::SetLkW, LockKind::Unlock) => LockOp::Unlock,
            (LockOp::GetLk, LockKind::Unlock) => {
                return Err(LockError::InvalidRange(
                    "F_GETLK needs a read or write lock type".to_string(),
                ));
            }
            (op, _) => op,
        };
        if matches!(op, LockOp::SetLk | LockOp::SetLkW) && !file.access.permits(fl.kind) {
            return Err(LockError::WrongAccessMode);
        }

        let range = resolve(fl, file)?;
        let candidate = LockRecord {
            universe,
            kind: if op == LockOp::Unlock {
                LockKind::Unlock
            } else {
                fl.kind
            },
            range,
            owner: match universe {
                Universe::Posix => u64::from(self.identity.pid),
                Universe::Flock => file.open_id,
            },
            holder_pid: self.identity.holder_pid,
        };

        let Some(mut guard) = self.registry.get(file.key, op != LockOp::Unlock)? else {
            trace!(key = %file.key, "unlock on a file without locks");
            return Ok(());
        };
        let result = match op {
            LockOp::SetLk | LockOp::SetLkW => self.setlock(&mut guard, &candidate, op.waits()),
            LockOp::Unlock => clearlock(&guard, &candidate),
            LockOp::GetLk => getlock(&guard, &candidate, fl),
        };
        self.registry.release(guard);
        result
    }

    fn setlock(&self, guard: &mut DomainGuard, candidate: &LockRecord, wait: bool) -> Result<()> {
        let mut dead_holders: HashSet<u32> = HashSet::new();
        loop {
            let remote = remote_view(guard.dir())?;
            let blocker = {
                let state = guard.state();
                let live_remote = remote
                    .iter()
                    .filter(|r| !dead_holders.contains(&r.holder_pid));
                first_conflict(state.held.iter().map(|h| &h.record).chain(live_remote), candidate)
            };
            let Some(blocker) = blocker else {
                break;
            };
            debug!(%candidate, %blocker, "lock request blocked");
            if !wait {
                return Err(LockError::WouldBlock);
            }

            if self.config.deadlock_detection && someone_waits_on_us(guard)? {
                debug!(%candidate, "refusing to wait while others wait on our locks");
                return Err(LockError::Deadlock);
            }

            // An flock upgrade gives up its shared lock before sleeping so two
            // upgraders can't wait on each other forever.
            if candidate.universe == Universe::Flock && candidate.kind == LockKind::Write {
                clearlock(
                    guard,
                    &LockRecord {
                        kind: LockKind::Unlock,
                        ..*candidate
                    },
                )?;
            }

            let Some(object) = guard.dir().open_object(&object_name(&blocker))? else {
                continue;
            };
            let holder = (blocker.universe == Universe::Posix).then_some(blocker.holder_pid);
            let poll = self.config.poll_interval();
            let wake = guard.suspend(|| object.wait(holder, &self.signals, poll))??;
            drop(object);

            match wake {
                Wake::Released => debug!(%blocker, "blocking lock released"),
                Wake::HolderExited => {
                    debug!(%blocker, "holder of blocking lock exited");
                    dead_holders.insert(blocker.holder_pid);
                }
                Wake::Interrupted => match self.signals.deliver() {
                    Disposition::Restart => debug!("signal handled, retrying lock"),
                    Disposition::Interrupt => return Err(LockError::Interrupted),
                },
            }
        }
        commit(guard, candidate)
    }

    /// Snapshot of the locks this process holds on `key`.
    pub fn held_locks(&self, key: FileKey) -> Result<Vec<LockRecord>> {
        let Some(guard) = self.registry.get(key, false)? else {
            return Ok(Vec::new());
        };
        let held = guard.state().held.iter().map(|h| h.record).collect();
        self.registry.release(guard);
        Ok(held)
    }

    /// Every lock any process has published on `key`.
    pub fn remote_locks(&self, key: FileKey) -> Result<Vec<LockRecord>> {
        let Some(guard) = self.registry.get(key, true)? else {
            return Ok(Vec::new());
        };
        let view = remote_view(guard.dir());
        self.registry.release(guard);
        view
    }

    /// Files this process currently caches a lock domain for.
    pub fn locked_files(&self) -> Vec<FileKey> {
        self.registry.keys()
    }
}

/// Rebuild all published locks on the domain's file from object names.
fn remote_view(dir: &dyn DirHandle) -> Result<Vec<LockRecord>> {
    Ok(dir
        .list()?
        .iter()
        .filter_map(|name| parse_object_name(name))
        .collect())
}

/// Whether another handle is open on any object this process published for
/// the file, meaning some process is waiting on a lock we hold.
fn someone_waits_on_us(guard: &DomainGuard) -> Result<bool> {
    let state = guard.state();
    for lock in &state.held {
        if let Some(object) = &lock.object
            && object.handle_count()? > 1
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Remove `range` from `held[idx]`, keeping whatever lies outside it.
///
/// The entry's object is released; survivors are republished later by
/// [`publish_pending`]. A split uses one reserved spare record.
fn carve(held: &mut Vec<HeldLock>, idx: usize, range: &LockRange, spare: &mut Spare) {
    held[idx].wake();
    let entry = held[idx].record;
    let left = (entry.range.start < range.start)
        .then(|| LockRange::new(entry.range.start, Some(range.start - 1)));
    let right = match range.end {
        Some(end) if entry.range.end.is_none_or(|e| e > end) => {
            Some(LockRange::new(end + 1, entry.range.end))
        }
        _ => None,
    };
    trace!(%entry, ?left, ?right, "carving held lock");

    match (left, right) {
        (Some(left), right) => {
            held[idx].record.range = left;
            if let Some(right) = right {
                spare.push(
                    held,
                    HeldLock::new(LockRecord {
                        range: right,
                        ..entry
                    }),
                );
            }
        }
        (None, Some(right)) => held[idx].record.range = right,
        (None, None) => {
            held.swap_remove(idx);
        }
    }
}

/// Merge `candidate` into the caller's own locks and republish.
fn commit(guard: &DomainGuard, candidate: &LockRecord) -> Result<()> {
    let mut state = guard.state();
    let held = &mut state.held;
    let mut spare = Spare::reserve(held, 2)?;

    loop {
        let overlap = first_overlap(
            held.iter().map(|h| &h.record),
            0,
            candidate,
            OwnerFilter::SelfOwned,
        );
        let Some((idx, overlap)) = overlap else {
            spare.push(held, HeldLock::new(*candidate));
            break;
        };
        match overlap {
            // Already covered by a lock of the same type.
            Overlap::Exact | Overlap::EntryContains if held[idx].record.kind == candidate.kind => {
                break;
            }
            Overlap::Exact => {
                held[idx].wake();
                held[idx].record.kind = candidate.kind;
                break;
            }
            _ => carve(held, idx, &candidate.range, &mut spare),
        }
    }

    held.sort_unstable_by_key(|h| h.record.range.start);
    publish_pending(held, guard.dir())
}

/// Remove the caller's locks over `candidate`'s range. Never blocks.
pub(crate) fn clearlock(guard: &DomainGuard, candidate: &LockRecord) -> Result<()> {
    let mut state = guard.state();
    let held = &mut state.held;
    let mut spare = Spare::reserve(held, 1)?;

    while let Some((idx, _)) = first_overlap(
        held.iter().map(|h| &h.record),
        0,
        candidate,
        OwnerFilter::SelfOwned,
    ) {
        carve(held, idx, &candidate.range, &mut spare);
    }

    held.sort_unstable_by_key(|h| h.record.range.start);
    publish_pending(held, guard.dir())
}

/// Report the first lock that would block `candidate`.
fn getlock(guard: &DomainGuard, candidate: &LockRecord, fl: &mut Flock) -> Result<()> {
    let remote = remote_view(guard.dir())?;
    let state = guard.state();
    let blocker = first_conflict(
        state.held.iter().map(|h| &h.record).chain(remote.iter()),
        candidate,
    );
    match blocker {
        Some(blocker) => {
            fl.kind = blocker.kind;
            fl.whence = Whence::Set;
            fl.start = blocker.range.start as i64;
            fl.len = blocker.range.len();
            fl.pid = match blocker.universe {
                Universe::Posix => blocker.owner as i32,
                Universe::Flock => -1,
            };
        }
        None => fl.kind = LockKind::Unlock,
    }
    Ok(())
}
