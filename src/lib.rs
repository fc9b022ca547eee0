//! advlock - POSIX advisory file locking without shared memory.
//!
//! Locks taken through [`lockf::LockEngine`] are visible to every process
//! sharing the same [`lockf::LockNamespace`].

pub mod config;
pub mod errno;
pub mod error;
pub mod lockf;

pub use error::{LockError, Result};
