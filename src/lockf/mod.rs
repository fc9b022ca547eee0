//! Advisory file locking engine.
//!
//! Implements `fcntl` byte-range locks, `flock` and `lockf` on top of a
//! namespace of named objects shared by all processes. A lock is published
//! by creating an object whose name is the serialized lock; releasing the
//! object wakes everyone blocked on it.
//!
//! # Layout
//!
//! - [`types`]: lock records, requests, file identities
//! - [`range`]: range resolution and overlap classification
//! - [`name`]: object and directory names
//! - [`namespace`]: the host object namespace and its implementations
//! - [`LockEngine`]: dispatch plus the set, clear and get algorithms,
//!   lifecycle hooks and the `fcntl`/`flock`/`lockf` front ends

pub mod api;
mod domain;
mod engine;
mod hooks;
pub mod name;
pub mod namespace;
mod pool;
pub mod range;
pub mod signal;
pub mod types;


pub use engine::LockEngine;
pub use hooks::ClosingDescriptor;
pub use namespace::{DirNamespace, LockNamespace, MemoryNamespace};
pub use signal::{Disposition, Signals};
pub use types::{
    AccessMode, FileKey, Flock, LockKind, LockOp, LockRange, LockRecord, OpenFile,
    ProcessIdentity, Universe, Whence,
};
