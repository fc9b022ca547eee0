//! Filesystem-backed lock namespace.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <device_hex8>-<inode_hex16>/     one directory per locked file
//!     mtx.lock                       directory mutex (JSON MutexMetadata)
//!     <object name>                  published lock, body = generation token
//!     <object name>.w<pid>-<seq>     one marker per waiter handle
//! ```
//!
//! Objects and the mutex are created with **create_new** semantics so only
//! one process can publish a given name. Releasing an object deletes its
//! file; waiters poll until the file is gone or carries a different
//! generation. A process that dies without cleaning up leaves files behind;
//! enumeration and waiting reap objects whose holder is no longer alive,
//! enumeration drops markers of dead waiters, and a mutex held by a dead
//! process is broken.
//!
//! Breaking a mutex renames it to a private `mtx.lock.stale-<pid>-<seq>`
//! name first, so only one process can claim a given stale file. If the
//! claimed file turns out to be a fresh mutex it is linked back.

use super::metadata::MutexMetadata;
use super::{DirHandle, LockNamespace, ObjectHandle, Wake};
use crate::config::Config;
use crate::error::{LockError, Result};
use crate::lockf::name::{MUTEX_NAME, dir_name, parse_object_name};
use crate::lockf::signal::Signals;
use crate::lockf::types::FileKey;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

/// Separator between an object name and a waiter marker suffix.
const MARKER_SEP: &str = ".w";

/// Whether the host process `pid` is still running.
///
/// Linux answers from `/proc`; elsewhere a holder is assumed alive.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/proc").join(pid.to_string()).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}

/// Lock namespace rooted at a directory shared by cooperating processes.
#[derive(Debug, Clone)]
pub struct DirNamespace {
    root: PathBuf,
    poll: Duration,
    stale_check: bool,
    seq: Arc<AtomicU64>,
}

impl DirNamespace {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            poll: Duration::from_millis(crate::config::types::default_poll_interval_ms()),
            stale_check: true,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Namespace rooted at `config.namespace_root`, polling and breaking
    /// stale mutexes as configured.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.namespace_root)
            .with_poll(config.poll_interval())
            .with_stale_check(config.mutex_stale_check)
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_stale_check(mut self, stale_check: bool) -> Self {
        self.stale_check = stale_check;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the objects of `key`.
    pub fn dir_path(&self, key: FileKey) -> PathBuf {
        self.root.join(dir_name(key))
    }
}

impl LockNamespace for DirNamespace {
    fn open_dir(&self, key: FileKey, holder_pid: u32) -> Result<Box<dyn DirHandle>> {
        let path = self.dir_path(key);
        ensure_dir(&path)?;
        Ok(Box::new(FsDir {
            path,
            pid: holder_pid,
            poll: self.poll,
            stale_check: self.stale_check,
            seq: Arc::clone(&self.seq),
        }))
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| LockError::sync(&format!("create lock directory '{}'", path.display()), e))
}

/// Split `<object>.w<pid>-<seq>` into the object name and waiter pid.
fn parse_marker(name: &str) -> Option<(&str, u32)> {
    let (object, suffix) = name.rsplit_once(MARKER_SEP)?;
    let (pid, _seq) = suffix.split_once('-')?;
    Some((object, pid.parse().ok()?))
}

#[derive(Debug)]
struct FsDir {
    path: PathBuf,
    pid: u32,
    poll: Duration,
    stale_check: bool,
    seq: Arc<AtomicU64>,
}

impl FsDir {
    fn mutex_path(&self) -> PathBuf {
        self.path.join(format!("{}.lock", MUTEX_NAME))
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Break the mutex if its recorded holder is dead. Returns true if broken.
    fn break_stale_mutex(&self, path: &Path) -> bool {
        if !self.stale_check {
            return false;
        }
        // A mutex whose metadata isn't written yet is being taken right now.
        let Ok(meta) = MutexMetadata::from_file(path) else {
            return false;
        };
        if process_alive(meta.pid) {
            return false;
        }
        self.claim_stale_mutex(path, &meta)
    }

    /// Take `path` out of the way if it still holds `stale`.
    ///
    /// The rename makes the claim exclusive: of several processes that saw
    /// the same dead holder only one moves the file. A file that no longer
    /// matches `stale` was recreated by a live locker and is linked back.
    fn claim_stale_mutex(&self, path: &Path, stale: &MutexMetadata) -> bool {
        let claimed = self.path.join(format!(
            "{}.lock.stale-{}-{}",
            MUTEX_NAME,
            self.pid,
            self.next_seq()
        ));
        if fs::rename(path, &claimed).is_err() {
            return false;
        }

        let still_stale = MutexMetadata::from_file(&claimed).is_ok_and(|m| m == *stale);
        if still_stale {
            warn!(
                mutex = %path.display(),
                pid = stale.pid,
                owner = %stale.owner,
                age = %stale.age_string(),
                "breaking mutex held by dead process"
            );
        } else if let Err(e) = fs::hard_link(&claimed, path) {
            warn!(mutex = %path.display(), error = %e, "failed to restore live mutex");
        }
        let _ = fs::remove_file(&claimed);
        still_stale
    }

    fn is_mutex_file(entry: &str) -> bool {
        entry
            .strip_prefix(MUTEX_NAME)
            .is_some_and(|rest| rest.starts_with(".lock"))
    }

    fn remove_object_files(&self, object: &str, entries: &[String]) {
        let _ = fs::remove_file(self.path.join(object));
        for entry in entries {
            if parse_marker(entry).is_some_and(|(o, _)| o == object) {
                let _ = fs::remove_file(self.path.join(entry));
            }
        }
    }
}

impl DirHandle for FsDir {
    fn lock(&self) -> Result<()> {
        let path = self.mutex_path();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let json = MutexMetadata::new(self.pid).to_json()?;
                    file.write_all(json.as_bytes()).map_err(|e| {
                        let _ = fs::remove_file(&path);
                        LockError::sync("write mutex metadata", e)
                    })?;
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.break_stale_mutex(&path) {
                        thread::sleep(self.poll);
                    }
                }
                // Directory removed by a process that found it empty.
                Err(e) if e.kind() == ErrorKind::NotFound => ensure_dir(&self.path)?,
                Err(e) => {
                    return Err(LockError::sync(
                        &format!("acquire mutex '{}'", path.display()),
                        e,
                    ));
                }
            }
        }
    }

    fn unlock(&self) {
        let path = self.mutex_path();
        if let Err(e) = fs::remove_file(&path) {
            warn!(mutex = %path.display(), error = %e, "failed to release mutex");
        }
    }

    fn create_object(&self, name: &str) -> Result<Box<dyn ObjectHandle>> {
        let path = self.path.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LockError::sync(&format!("create lock object '{}'", name), e))?;

        let generation = format!(
            "{}-{}-{}",
            self.pid,
            self.next_seq(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        file.write_all(generation.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&path);
            LockError::sync(&format!("write lock object '{}'", name), e)
        })?;
        trace!(object = name, pid = self.pid, "published lock object");

        Ok(Box::new(FsObject {
            dir: self.path.clone(),
            name: name.to_string(),
            generation,
            marker: None,
            released: false,
        }))
    }

    fn open_object(&self, name: &str) -> Result<Option<Box<dyn ObjectHandle>>> {
        let path = self.path.join(name);
        let generation = match fs::read_to_string(&path) {
            Ok(g) => g,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LockError::sync(&format!("open lock object '{}'", name), e)),
        };

        let marker = self.path.join(format!(
            "{}{}{}-{}",
            name,
            MARKER_SEP,
            self.pid,
            self.next_seq()
        ));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .map_err(|e| LockError::sync(&format!("open lock object '{}'", name), e))?;

        let object = FsObject {
            dir: self.path.clone(),
            name: name.to_string(),
            generation,
            marker: Some(marker),
            released: false,
        };
        // Released between the read and the marker.
        if !object.is_current()? {
            return Ok(None);
        }
        Ok(Some(Box::new(object)))
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries: Vec<String> = match fs::read_dir(&self.path) {
            Ok(rd) => rd
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LockError::sync(
                    &format!("enumerate '{}'", self.path.display()),
                    e,
                ));
            }
        };

        let mut names = Vec::new();
        for entry in &entries {
            if Self::is_mutex_file(entry) {
                continue;
            }
            if let Some((_, pid)) = parse_marker(entry) {
                if !process_alive(pid) {
                    let _ = fs::remove_file(self.path.join(entry));
                }
                continue;
            }
            if let Some(record) = parse_object_name(entry)
                && !process_alive(record.holder_pid)
            {
                warn!(object = %entry, pid = record.holder_pid, "reaping lock of dead process");
                self.remove_object_files(entry, &entries);
                continue;
            }
            names.push(entry.clone());
        }
        names.sort();
        Ok(names)
    }
}

impl Drop for FsDir {
    fn drop(&mut self) {
        // Only succeeds once no objects and no mutex remain.
        let _ = fs::remove_dir(&self.path);
    }
}

#[derive(Debug)]
struct FsObject {
    dir: PathBuf,
    name: String,
    generation: String,
    /// Waiter marker; `None` for the creator's handle.
    marker: Option<PathBuf>,
    released: bool,
}

impl FsObject {
    fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Whether the object file still carries this handle's generation.
    fn is_current(&self) -> Result<bool> {
        match fs::read_to_string(self.path()) {
            Ok(g) => Ok(g == self.generation),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LockError::sync(&format!("read lock object '{}'", self.name), e)),
        }
    }

    fn remove_if_current(&self) {
        if matches!(self.is_current(), Ok(true))
            && let Err(e) = fs::remove_file(self.path())
        {
            warn!(object = %self.name, error = %e, "failed to remove lock object");
        }
    }
}

impl ObjectHandle for FsObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_count(&self) -> Result<u32> {
        let mut count = u32::from(self.is_current()?);
        let rd = fs::read_dir(&self.dir)
            .map_err(|e| LockError::sync(&format!("enumerate '{}'", self.dir.display()), e))?;
        for entry in rd.filter_map(|e| e.ok()) {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some((object, pid)) = parse_marker(&file_name)
                && object == self.name
                && process_alive(pid)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    fn release(mut self: Box<Self>) {
        if self.marker.is_none() {
            self.remove_if_current();
            trace!(object = %self.name, "signaled lock object");
        }
        self.released = true;
    }

    fn wait(&self, holder: Option<u32>, signals: &Signals, poll: Duration) -> Result<Wake> {
        let publisher = parse_object_name(&self.name).map(|r| r.holder_pid);
        loop {
            if !self.is_current()? {
                return Ok(Wake::Released);
            }
            if let Some(pid) = holder
                && !process_alive(pid)
            {
                return Ok(Wake::HolderExited);
            }
            // The host closes a dead process's handles, which signals its
            // objects.
            if let Some(pid) = publisher
                && !process_alive(pid)
            {
                warn!(object = %self.name, pid, "reclaiming lock of dead process");
                self.remove_if_current();
                return Ok(Wake::Released);
            }
            if signals.is_pending() {
                return Ok(Wake::Interrupted);
            }
            thread::sleep(poll);
        }
    }
}

impl Drop for FsObject {
    fn drop(&mut self) {
        match &self.marker {
            Some(marker) => {
                let _ = fs::remove_file(marker);
            }
            // The creator closing its handle abandons the lock.
            None if !self.released => self.remove_if_current(),
            None => {}
        }
    }
}
