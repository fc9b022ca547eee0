//! Lifecycle hooks driven by the descriptor table.

use super::domain::{DomainRegistry, HeldLock, publish_pending};
use super::engine::{LockEngine, clearlock};
use super::pool::Spare;
use super::signal::Signals;
use super::types::{FileKey, LockKind, LockRange, LockRecord, ProcessIdentity, Universe};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// A descriptor closed on `exec` because it was marked close-on-exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosingDescriptor {
    pub key: FileKey,
    pub open_id: u64,
    /// Last descriptor referring to the open file description.
    pub last_reference: bool,
}

impl LockEngine {
    /// A descriptor on `key` is being closed.
    ///
    /// POSIX locks belong to the process, so all of them on the file go no
    /// matter which descriptor closes. FLOCK locks of `open_id` go only when
    /// this was the last reference to the open file description.
    pub fn on_descriptor_close(&self, key: FileKey, open_id: u64, last_reference: bool) -> Result<()> {
        let Some(guard) = self.registry.get(key, false)? else {
            return Ok(());
        };

        let posix = LockRecord {
            universe: Universe::Posix,
            kind: LockKind::Unlock,
            range: LockRange::whole_file(),
            owner: u64::from(self.identity.pid),
            holder_pid: self.identity.holder_pid,
        };
        let mut result = clearlock(&guard, &posix);
        if last_reference {
            let flock = LockRecord {
                universe: Universe::Flock,
                owner: open_id,
                ..posix
            };
            result = result.and(clearlock(&guard, &flock));
        }
        debug!(%key, open_id, last_reference, "descriptor closed");

        self.registry.release(guard);
        result
    }

    /// Engine for a child created by `fork`.
    ///
    /// The child starts with no locks: POSIX locks stay with the parent,
    /// and the child's own requests are owned by its own pid.
    pub fn on_fork(&self, child: ProcessIdentity) -> LockEngine {
        debug!(parent = self.identity.pid, child = child.pid, "fork");
        LockEngine::new(Arc::clone(&self.namespace), child, self.config.clone())
            .with_signals(Arc::new(Signals::new()))
    }

    /// The process image is replaced by `exec`.
    ///
    /// Close-on-exec descriptors are closed first. The host process changes
    /// across exec, so every surviving lock is republished under
    /// `new_holder_pid` before the old objects are released; waiters wake,
    /// rescan, and from then on watch the new holder.
    pub fn on_exec(&mut self, new_holder_pid: u32, cloexec: &[ClosingDescriptor]) -> Result<()> {
        let mut first_err = None;
        for desc in cloexec {
            if let Err(e) = self.on_descriptor_close(desc.key, desc.open_id, desc.last_reference) {
                first_err.get_or_insert(e);
            }
        }

        let old = std::mem::replace(
            &mut self.registry,
            DomainRegistry::new(Arc::clone(&self.namespace), new_holder_pid),
        );
        self.identity.holder_pid = new_holder_pid;

        for key in old.keys() {
            let mut previous = match old.detach(key) {
                Ok(held) => held,
                Err(e) => {
                    warn!(%key, error = %e, "could not detach locks across exec");
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            if previous.is_empty() {
                continue;
            }
            if let Err(e) = self.republish(key, &previous) {
                first_err.get_or_insert(e);
            }
            for lock in &mut previous {
                lock.wake();
            }
            debug!(%key, count = previous.len(), new_holder_pid, "relabeled locks after exec");
        }

        first_err.map_or(Ok(()), Err)
    }

    fn republish(&self, key: FileKey, previous: &[HeldLock]) -> Result<()> {
        let Some(guard) = self.registry.get(key, true)? else {
            return Ok(());
        };
        let result = {
            let mut state = guard.state();
            match Spare::reserve(&mut state.held, previous.len()) {
                Ok(mut spare) => {
                    for lock in previous {
                        let record = LockRecord {
                            holder_pid: self.identity.holder_pid,
                            ..lock.record
                        };
                        spare.push(&mut state.held, HeldLock::new(record));
                    }
                    publish_pending(&mut state.held, guard.dir())
                }
                Err(e) => Err(e),
            }
        };
        self.registry.release(guard);
        result
    }
}
