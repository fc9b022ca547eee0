//! Host object namespace used to publish locks across processes.
//!
//! Nothing about lock state is shared in memory between processes. Instead
//! every lock is announced by a named object in a per-file directory of a
//! namespace all processes can see:
//!
//! - the object's **name** is the serialized lock ([`crate::lockf::name`]),
//! - its **existence** means the lock is held,
//! - **releasing** it (signal, then close) wakes everyone waiting on it.
//!
//! Two namespaces are provided. [`MemoryNamespace`] keeps the objects inside
//! the current process and can simulate any number of lock-holding
//! processes, including their abnormal death. [`DirNamespace`] keeps them as
//! files below a directory, so separate OS processes can share locks.

mod dir;
mod memory;
mod metadata;

pub use dir::{DirNamespace, process_alive};
pub use memory::MemoryNamespace;
pub use metadata::MutexMetadata;

use super::signal::Signals;
use super::types::FileKey;
use crate::error::Result;
use std::fmt::Debug;
use std::time::Duration;

/// Why a wait on a published lock object ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The object was released (or abandoned by its creator).
    Released,
    /// The process holding the lock is gone.
    HolderExited,
    /// A signal is pending for the waiting process.
    Interrupted,
}

/// A host namespace that can hold lock directories.
pub trait LockNamespace: Send + Sync + Debug {
    /// Open, creating if needed, the directory of `key` and its mutex.
    ///
    /// Handles created through the returned directory are attributed to
    /// `holder_pid`.
    fn open_dir(&self, key: FileKey, holder_pid: u32) -> Result<Box<dyn DirHandle>>;
}

/// One process's handle on a file's lock directory.
///
/// Dropping it closes the handle; the directory goes away once no process
/// holds a handle and it contains no objects.
pub trait DirHandle: Send + Sync + Debug {
    /// Acquire the directory's cross-process mutex.
    fn lock(&self) -> Result<()>;

    /// Release the directory's cross-process mutex.
    fn unlock(&self);

    /// Publish a new object. The returned handle is the creator's handle.
    fn create_object(&self, name: &str) -> Result<Box<dyn ObjectHandle>>;

    /// Open an existing object to wait on it.
    ///
    /// `Ok(None)` means no such object exists any more.
    fn open_object(&self, name: &str) -> Result<Option<Box<dyn ObjectHandle>>>;

    /// Names of all objects currently in the directory.
    fn list(&self) -> Result<Vec<String>>;
}

/// An open handle on a published lock object.
pub trait ObjectHandle: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Open handles on this object across all processes.
    fn handle_count(&self) -> Result<u32>;

    /// Signal the object so all waiters wake, then close this handle.
    fn release(self: Box<Self>);

    /// Block until the object is released, `holder` (if given) has exited,
    /// or a signal is pending.
    ///
    /// `poll` bounds how long the wait sleeps between liveness and signal
    /// checks. Fails if `holder`'s liveness can't be determined.
    fn wait(&self, holder: Option<u32>, signals: &Signals, poll: Duration) -> Result<Wake>;
}
