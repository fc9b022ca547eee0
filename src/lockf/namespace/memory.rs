//! In-process lock namespace.
//!
//! Every [`crate::lockf::LockEngine`] sharing one `MemoryNamespace` behaves
//! like a separate process: handles are attributed to a host pid, and
//! [`MemoryNamespace::exit_process`] reclaims them the way a host cleans up
//! after a process that died without unlocking.

use super::{DirHandle, LockNamespace, ObjectHandle, Wake};
use crate::error::{LockError, Result};
use crate::lockf::name::dir_name;
use crate::lockf::signal::Signals;
use crate::lockf::types::{FileKey, ProcessIdentity};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// First pid handed out by [`MemoryNamespace::spawn_process`].
const FIRST_PID: u32 = 1000;

/// Namespace whose objects live in this process's memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNamespace {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug)]
struct State {
    next_pid: u32,
    next_id: u64,
    /// Known processes and whether they are alive.
    processes: HashMap<u32, bool>,
    dirs: HashMap<String, DirState>,
    objects: HashMap<u64, ObjectState>,
    handles: HashMap<u64, Handle>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_pid: FIRST_PID,
            next_id: 1,
            processes: HashMap::new(),
            dirs: HashMap::new(),
            objects: HashMap::new(),
            handles: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct DirState {
    /// Object name -> object id, for objects that are still held.
    names: HashMap<String, u64>,
    mutex_owner: Option<u32>,
    handles: usize,
}

#[derive(Debug)]
struct ObjectState {
    dir: String,
    name: String,
    /// Handle id of the creator.
    creator: u64,
    /// Creator handle still open and object not yet signaled.
    held: bool,
    handles: u32,
}

#[derive(Debug)]
enum Handle {
    Dir { dir: String, pid: u32 },
    Object { object: u64, pid: u32 },
}

impl Handle {
    fn pid(&self) -> u32 {
        match self {
            Handle::Dir { pid, .. } | Handle::Object { pid, .. } => *pid,
        }
    }
}

impl State {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn unlink(&mut self, object: u64) {
        let Some(obj) = self.objects.get(&object) else {
            return;
        };
        if let Some(dir) = self.dirs.get_mut(&obj.dir)
            && dir.names.get(&obj.name) == Some(&object)
        {
            dir.names.remove(&obj.name);
        }
    }

    fn maybe_drop_dir(&mut self, name: &str) {
        let unused = self
            .dirs
            .get(name)
            .is_some_and(|d| d.handles == 0 && d.names.is_empty() && d.mutex_owner.is_none());
        if unused {
            trace!(dir = name, "removing unused lock directory");
            self.dirs.remove(name);
        }
    }

    fn close_handle(&mut self, id: u64) {
        let Some(handle) = self.handles.remove(&id) else {
            // Already reclaimed by exit_process.
            return;
        };
        match handle {
            Handle::Dir { dir, .. } => {
                if let Some(d) = self.dirs.get_mut(&dir) {
                    d.handles = d.handles.saturating_sub(1);
                }
                self.maybe_drop_dir(&dir);
            }
            Handle::Object { object, .. } => {
                let Some(obj) = self.objects.get_mut(&object) else {
                    return;
                };
                obj.handles = obj.handles.saturating_sub(1);
                let abandoned = obj.creator == id && obj.held;
                let gone = obj.handles == 0;
                if abandoned {
                    obj.held = false;
                    self.unlink(object);
                }
                if gone {
                    self.unlink(object);
                    if let Some(obj) = self.objects.remove(&object) {
                        self.maybe_drop_dir(&obj.dir);
                    }
                }
            }
        }
    }
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live process and return its identity.
    pub fn spawn_process(&self) -> ProcessIdentity {
        let mut state = self.shared.state();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(pid, true);
        ProcessIdentity::new(pid, pid)
    }

    /// Register `pid` as a live process.
    pub fn register_process(&self, pid: u32) {
        self.shared.state().processes.insert(pid, true);
    }

    /// Whether `pid` is alive; `None` if it was never registered.
    pub fn is_alive(&self, pid: u32) -> Option<bool> {
        self.shared.state().processes.get(&pid).copied()
    }

    /// Simulate abnormal death of `pid`.
    ///
    /// Every handle the process had open is closed without signaling, any
    /// directory mutex it held is released, and waiters watching it for
    /// liveness wake up.
    pub fn exit_process(&self, pid: u32) {
        let mut state = self.shared.state();
        state.processes.insert(pid, false);

        let owned: Vec<u64> = state
            .handles
            .iter()
            .filter(|(_, h)| h.pid() == pid)
            .map(|(id, _)| *id)
            .collect();
        for id in &owned {
            state.close_handle(*id);
        }

        let held_mutexes: Vec<String> = state
            .dirs
            .iter()
            .filter(|(_, d)| d.mutex_owner == Some(pid))
            .map(|(name, _)| name.clone())
            .collect();
        for name in held_mutexes {
            if let Some(dir) = state.dirs.get_mut(&name) {
                dir.mutex_owner = None;
            }
            state.maybe_drop_dir(&name);
        }

        debug!(pid, handles = owned.len(), "process exited, handles reclaimed");
        drop(state);
        self.shared.changed.notify_all();
    }

    /// Number of lock directories currently present.
    pub fn dir_count(&self) -> usize {
        self.shared.state().dirs.len()
    }
}

impl LockNamespace for MemoryNamespace {
    fn open_dir(&self, key: FileKey, holder_pid: u32) -> Result<Box<dyn DirHandle>> {
        let name = dir_name(key);
        let mut state = self.shared.state();
        state.dirs.entry(name.clone()).or_default().handles += 1;
        let handle = state.alloc_id();
        state.handles.insert(
            handle,
            Handle::Dir {
                dir: name.clone(),
                pid: holder_pid,
            },
        );
        Ok(Box::new(MemoryDir {
            shared: Arc::clone(&self.shared),
            name,
            pid: holder_pid,
            handle,
        }))
    }
}

#[derive(Debug)]
struct MemoryDir {
    shared: Arc<Shared>,
    name: String,
    pid: u32,
    handle: u64,
}

impl MemoryDir {
    fn missing(&self) -> LockError {
        LockError::sync("lock directory", format!("'{}' no longer exists", self.name))
    }
}

impl DirHandle for MemoryDir {
    fn lock(&self) -> Result<()> {
        let mut state = self.shared.state();
        loop {
            let dir = state.dirs.get_mut(&self.name).ok_or_else(|| self.missing())?;
            if dir.mutex_owner.is_none() {
                dir.mutex_owner = Some(self.pid);
                return Ok(());
            }
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    fn unlock(&self) {
        let mut state = self.shared.state();
        if let Some(dir) = state.dirs.get_mut(&self.name)
            && dir.mutex_owner == Some(self.pid)
        {
            dir.mutex_owner = None;
        }
        drop(state);
        self.shared.changed.notify_all();
    }

    fn create_object(&self, name: &str) -> Result<Box<dyn ObjectHandle>> {
        let mut state = self.shared.state();
        let dir = state.dirs.get(&self.name).ok_or_else(|| self.missing())?;
        if dir.names.contains_key(name) {
            return Err(LockError::sync(
                "create lock object",
                format!("'{}' already exists", name),
            ));
        }

        let object = state.alloc_id();
        let handle = state.alloc_id();
        state.objects.insert(
            object,
            ObjectState {
                dir: self.name.clone(),
                name: name.to_string(),
                creator: handle,
                held: true,
                handles: 1,
            },
        );
        state.handles.insert(
            handle,
            Handle::Object {
                object,
                pid: self.pid,
            },
        );
        if let Some(dir) = state.dirs.get_mut(&self.name) {
            dir.names.insert(name.to_string(), object);
        }
        trace!(name, pid = self.pid, "published lock object");

        Ok(Box::new(MemoryObject {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            object,
            handle,
        }))
    }

    fn open_object(&self, name: &str) -> Result<Option<Box<dyn ObjectHandle>>> {
        let mut state = self.shared.state();
        let dir = state.dirs.get(&self.name).ok_or_else(|| self.missing())?;
        let Some(&object) = dir.names.get(name) else {
            return Ok(None);
        };

        let handle = state.alloc_id();
        if let Some(obj) = state.objects.get_mut(&object) {
            obj.handles += 1;
        }
        state.handles.insert(
            handle,
            Handle::Object {
                object,
                pid: self.pid,
            },
        );

        Ok(Some(Box::new(MemoryObject {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            object,
            handle,
        })))
    }

    fn list(&self) -> Result<Vec<String>> {
        let state = self.shared.state();
        let dir = state.dirs.get(&self.name).ok_or_else(|| self.missing())?;
        let mut names: Vec<String> = dir.names.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

impl Drop for MemoryDir {
    fn drop(&mut self) {
        self.shared.state().close_handle(self.handle);
        self.shared.changed.notify_all();
    }
}

#[derive(Debug)]
struct MemoryObject {
    shared: Arc<Shared>,
    name: String,
    object: u64,
    handle: u64,
}

impl ObjectHandle for MemoryObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_count(&self) -> Result<u32> {
        Ok(self
            .shared
            .state()
            .objects
            .get(&self.object)
            .map_or(0, |o| o.handles))
    }

    fn release(self: Box<Self>) {
        let mut state = self.shared.state();
        if let Some(obj) = state.objects.get_mut(&self.object) {
            obj.held = false;
        }
        state.unlink(self.object);
        trace!(name = %self.name, "signaled lock object");
        drop(state);
        // Drop closes the handle and wakes waiters.
    }

    fn wait(&self, holder: Option<u32>, signals: &Signals, poll: Duration) -> Result<Wake> {
        let mut state = self.shared.state();
        loop {
            let held = state.objects.get(&self.object).is_some_and(|o| o.held);
            if !held {
                return Ok(Wake::Released);
            }
            if let Some(pid) = holder {
                match state.processes.get(&pid) {
                    None => {
                        return Err(LockError::sync(
                            "open holder process",
                            format!("no such process {}", pid),
                        ));
                    }
                    Some(false) => return Ok(Wake::HolderExited),
                    Some(true) => {}
                }
            }
            if signals.is_pending() {
                return Ok(Wake::Interrupted);
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, poll)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        self.shared.state().close_handle(self.handle);
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const POLL: Duration = Duration::from_millis(5);

    fn key() -> FileKey {
        FileKey::new(1, 42)
    }

    #[test]
    fn spawned_processes_get_distinct_pids() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let b = ns.spawn_process();
        assert_ne!(a.pid, b.pid);
        assert_eq!(ns.is_alive(a.pid), Some(true));
        assert_eq!(ns.is_alive(9), None);
    }

    #[test]
    fn objects_are_listed_until_released() {
        let ns = MemoryNamespace::new();
        let p = ns.spawn_process();
        let dir = ns.open_dir(key(), p.holder_pid).unwrap();

        let obj = dir.create_object("first").unwrap();
        assert_eq!(dir.list().unwrap(), vec!["first".to_string()]);
        assert_eq!(obj.handle_count().unwrap(), 1);

        obj.release();
        assert!(dir.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_live_name_is_rejected() {
        let ns = MemoryNamespace::new();
        let p = ns.spawn_process();
        let dir = ns.open_dir(key(), p.holder_pid).unwrap();
        let _obj = dir.create_object("dup").unwrap();
        assert!(dir.create_object("dup").is_err());
    }

    #[test]
    fn opening_counts_handles() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let b = ns.spawn_process();
        let dir_a = ns.open_dir(key(), a.holder_pid).unwrap();
        let dir_b = ns.open_dir(key(), b.holder_pid).unwrap();

        let obj = dir_a.create_object("x").unwrap();
        let waiter = dir_b.open_object("x").unwrap().unwrap();
        assert_eq!(obj.handle_count().unwrap(), 2);
        drop(waiter);
        assert_eq!(obj.handle_count().unwrap(), 1);
        assert!(dir_b.open_object("missing").unwrap().is_none());
    }

    #[test]
    fn release_wakes_waiter() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let b = ns.spawn_process();
        let dir_a = ns.open_dir(key(), a.holder_pid).unwrap();
        let dir_b = ns.open_dir(key(), b.holder_pid).unwrap();
        let obj = dir_a.create_object("x").unwrap();
        let waiter = dir_b.open_object("x").unwrap().unwrap();

        let handle = thread::spawn(move || {
            let signals = Signals::new();
            waiter.wait(Some(a.holder_pid), &signals, POLL)
        });
        thread::sleep(Duration::from_millis(20));
        obj.release();

        assert_eq!(handle.join().unwrap().unwrap(), Wake::Released);
    }

    #[test]
    fn exit_reclaims_handles_and_mutex() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let b = ns.spawn_process();
        let dir_a = ns.open_dir(key(), a.holder_pid).unwrap();
        let dir_b = ns.open_dir(key(), b.holder_pid).unwrap();

        dir_a.lock().unwrap();
        let _obj = dir_a.create_object("x").unwrap();
        let waiter = dir_b.open_object("x").unwrap().unwrap();

        ns.exit_process(a.pid);

        let signals = Signals::new();
        assert_eq!(
            waiter.wait(Some(a.holder_pid), &signals, POLL).unwrap(),
            Wake::Released
        );
        assert!(dir_b.list().unwrap().is_empty());
        // The dead process's mutex was released.
        dir_b.lock().unwrap();
        dir_b.unlock();
    }

    #[test]
    fn unknown_holder_cannot_be_confirmed() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let dir = ns.open_dir(key(), a.holder_pid).unwrap();
        let _obj = dir.create_object("x").unwrap();
        let waiter = dir.open_object("x").unwrap().unwrap();

        let signals = Signals::new();
        assert!(matches!(
            waiter.wait(Some(4_000_000), &signals, POLL),
            Err(LockError::SyncPrimitiveFailure(_))
        ));
    }

    #[test]
    fn pending_signal_interrupts_wait() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let dir = ns.open_dir(key(), a.holder_pid).unwrap();
        let _obj = dir.create_object("x").unwrap();
        let waiter = dir.open_object("x").unwrap().unwrap();

        let signals = Signals::new();
        signals.raise();
        assert_eq!(waiter.wait(None, &signals, POLL).unwrap(), Wake::Interrupted);
    }

    #[test]
    fn directory_disappears_with_last_handle() {
        let ns = MemoryNamespace::new();
        let a = ns.spawn_process();
        let dir = ns.open_dir(key(), a.holder_pid).unwrap();
        assert_eq!(ns.dir_count(), 1);
        drop(dir);
        assert_eq!(ns.dir_count(), 0);
    }
}
