//! Lock domain cache.
//!
//! A process keeps one [`LockDomain`] per locked file: its own held locks
//! plus its handle on the file's namespace directory. Domains are created on
//! first use and evicted as soon as they hold no locks and no thread is
//! working on them.

use super::name::object_name;
use super::namespace::{DirHandle, LockNamespace, ObjectHandle};
use super::types::{FileKey, LockRecord};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{trace, warn};

/// A lock this process holds, with the creator handle of its published
/// object. `object == None` means the record still has to be published.
#[derive(Debug)]
pub(crate) struct HeldLock {
    pub(crate) record: LockRecord,
    pub(crate) object: Option<Box<dyn ObjectHandle>>,
}

impl HeldLock {
    pub(crate) fn new(record: LockRecord) -> Self {
        Self {
            record,
            object: None,
        }
    }

    /// Release the published object so everyone waiting on it rescans.
    pub(crate) fn wake(&mut self) {
        if let Some(object) = self.object.take() {
            trace!(object = object.name(), "waking waiters");
            object.release();
        }
    }
}

/// Publish every held lock that has no object yet.
///
/// Keeps going after a failure so as many records as possible stay visible;
/// the first error is returned.
pub(crate) fn publish_pending(held: &mut [HeldLock], dir: &dyn DirHandle) -> Result<()> {
    let mut first_err = None;
    for lock in held.iter_mut().filter(|l| l.object.is_none()) {
        match dir.create_object(&object_name(&lock.record)) {
            Ok(object) => lock.object = Some(object),
            Err(e) => {
                warn!(record = %lock.record, error = %e, "failed to publish lock");
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

#[derive(Debug, Default)]
pub(crate) struct DomainState {
    pub(crate) held: Vec<HeldLock>,
    /// Removed from the registry; a thread that finds this must look again.
    evicted: bool,
    /// Threads between `get` and `release`, including blocked waiters.
    users: usize,
}

#[derive(Debug)]
pub(crate) struct LockDomain {
    key: FileKey,
    dir: Box<dyn DirHandle>,
    state: Mutex<DomainState>,
}

impl LockDomain {
    fn state(&self) -> MutexGuard<'_, DomainState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A domain whose directory mutex the current thread holds.
///
/// Dropping the guard releases the mutex; callers hand it back through
/// [`DomainRegistry::release`] so empty domains get evicted.
#[derive(Debug)]
pub(crate) struct DomainGuard {
    domain: Arc<LockDomain>,
    locked: bool,
}

impl DomainGuard {
    #[cfg(test)]
    pub(crate) fn key(&self) -> FileKey {
        self.domain.key
    }

    pub(crate) fn dir(&self) -> &dyn DirHandle {
        self.domain.dir.as_ref()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DomainState> {
        self.domain.state()
    }

    /// Run `f` with the directory mutex released, then take it back.
    pub(crate) fn suspend<T>(&mut self, f: impl FnOnce() -> T) -> Result<T> {
        self.domain.dir.unlock();
        self.locked = false;
        let out = f();
        self.domain.dir.lock()?;
        self.locked = true;
        Ok(out)
    }
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        if self.locked {
            self.domain.dir.unlock();
        }
    }
}

/// The per-process map from file key to lock domain.
#[derive(Debug)]
pub(crate) struct DomainRegistry {
    namespace: Arc<dyn LockNamespace>,
    holder_pid: u32,
    domains: Mutex<HashMap<FileKey, Arc<LockDomain>>>,
}

impl DomainRegistry {
    pub(crate) fn new(namespace: Arc<dyn LockNamespace>, holder_pid: u32) -> Self {
        Self {
            namespace,
            holder_pid,
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<FileKey, Arc<LockDomain>>> {
        self.domains.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Look up the domain of `key` and take its directory mutex.
    ///
    /// Without `create`, a file this process holds no domain for yields
    /// `Ok(None)` and nothing is opened.
    pub(crate) fn get(&self, key: FileKey, create: bool) -> Result<Option<DomainGuard>> {
        loop {
            let domain = {
                let mut domains = self.domains();
                match domains.get(&key) {
                    Some(domain) => Arc::clone(domain),
                    None if !create => return Ok(None),
                    None => {
                        let dir = self.namespace.open_dir(key, self.holder_pid)?;
                        trace!(%key, "opened lock domain");
                        let domain = Arc::new(LockDomain {
                            key,
                            dir,
                            state: Mutex::new(DomainState::default()),
                        });
                        domains.insert(key, Arc::clone(&domain));
                        domain
                    }
                }
            };

            domain.dir.lock()?;
            let guard = DomainGuard {
                domain,
                locked: true,
            };
            let evicted = {
                let mut state = guard.state();
                if !state.evicted {
                    state.users += 1;
                }
                state.evicted
            };
            if !evicted {
                return Ok(Some(guard));
            }
        }
    }

    /// Hand a domain back, evicting it if nothing is left in it.
    pub(crate) fn release(&self, guard: DomainGuard) {
        let evict = {
            let mut state = guard.state();
            state.users = state.users.saturating_sub(1);
            state.evicted = state.held.is_empty() && state.users == 0;
            state.evicted
        };
        if evict {
            let mut domains = self.domains();
            if domains
                .get(&guard.domain.key)
                .is_some_and(|d| Arc::ptr_eq(d, &guard.domain))
            {
                domains.remove(&guard.domain.key);
            }
            trace!(key = %guard.domain.key, "evicted empty lock domain");
        }
        drop(guard);
    }

    /// Keys of all cached domains.
    pub(crate) fn keys(&self) -> Vec<FileKey> {
        let mut keys: Vec<FileKey> = self.domains().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Take every held lock out of the domain of `key`, leaving the
    /// published objects alive, and evict the domain.
    pub(crate) fn detach(&self, key: FileKey) -> Result<Vec<HeldLock>> {
        let Some(guard) = self.get(key, false)? else {
            return Ok(Vec::new());
        };
        let held = std::mem::take(&mut guard.state().held);
        self.release(guard);
        Ok(held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockf::namespace::MemoryNamespace;
    use crate::lockf::types::{LockKind, LockRange, Universe};

    fn setup() -> (MemoryNamespace, DomainRegistry) {
        let ns = MemoryNamespace::new();
        let identity = ns.spawn_process();
        let registry = DomainRegistry::new(Arc::new(ns.clone()), identity.holder_pid);
        (ns, registry)
    }

    fn record(start: u64) -> LockRecord {
        LockRecord {
            universe: Universe::Posix,
            kind: LockKind::Read,
            range: LockRange::new(start, Some(start + 9)),
            owner: 1,
            holder_pid: 1,
        }
    }

    #[test]
    fn lookup_without_create_opens_nothing() {
        let (ns, registry) = setup();
        assert!(registry.get(FileKey::new(1, 1), false).unwrap().is_none());
        assert_eq!(ns.dir_count(), 0);
    }

    #[test]
    fn empty_domain_is_evicted_on_release() {
        let (ns, registry) = setup();
        let key = FileKey::new(1, 1);
        let guard = registry.get(key, true).unwrap().unwrap();
        assert_eq!(guard.key(), key);
        assert_eq!(registry.keys(), vec![key]);

        registry.release(guard);
        assert!(registry.keys().is_empty());
        assert_eq!(ns.dir_count(), 0);
    }

    #[test]
    fn domain_with_locks_stays_cached() {
        let (_ns, registry) = setup();
        let key = FileKey::new(1, 2);
        let guard = registry.get(key, true).unwrap().unwrap();
        {
            let mut state = guard.state();
            state.held.push(HeldLock::new(record(0)));
            publish_pending(&mut state.held, guard.dir()).unwrap();
        }
        registry.release(guard);
        assert_eq!(registry.keys(), vec![key]);

        let guard = registry.get(key, false).unwrap().unwrap();
        assert_eq!(guard.dir().list().unwrap().len(), 1);
        registry.release(guard);
    }

    #[test]
    fn wake_unpublishes_record() {
        let (_ns, registry) = setup();
        let guard = registry.get(FileKey::new(1, 3), true).unwrap().unwrap();
        {
            let mut state = guard.state();
            state.held.push(HeldLock::new(record(0)));
            state.held.push(HeldLock::new(record(20)));
            publish_pending(&mut state.held, guard.dir()).unwrap();
            state.held[0].wake();
            assert!(state.held[0].object.is_none());
        }
        assert_eq!(guard.dir().list().unwrap().len(), 1);
        guard.state().held.clear();
        registry.release(guard);
    }

    #[test]
    fn detach_keeps_objects_published() {
        let (_ns, registry) = setup();
        let key = FileKey::new(1, 4);
        let guard = registry.get(key, true).unwrap().unwrap();
        {
            let mut state = guard.state();
            state.held.push(HeldLock::new(record(0)));
            publish_pending(&mut state.held, guard.dir()).unwrap();
        }
        registry.release(guard);

        let held = registry.detach(key).unwrap();
        assert_eq!(held.len(), 1);
        assert!(held[0].object.is_some());
        assert!(registry.keys().is_empty());
    }
}
