//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the locking engine and its namespaces.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Namespace settings
    // =========================================================================
    /// Root directory of the filesystem lock namespace.
    ///
    /// Every locked file gets a `<dev>-<ino>` subdirectory below it.
    #[serde(default = "default_namespace_root")]
    pub namespace_root: PathBuf,

    /// Break the per-file mutex when the process recorded in it is dead.
    #[serde(default = "default_true")]
    pub mutex_stale_check: bool,

    // =========================================================================
    // Wait settings
    // =========================================================================
    /// Granularity of blocking waits, in milliseconds.
    ///
    /// Blocked callers re-check holder liveness and pending signals at
    /// least this often.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Refuse to block while another process waits on one of our locks.
    #[serde(default = "default_true")]
    pub deadlock_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace_root: default_namespace_root(),
            mutex_stale_check: default_true(),
            poll_interval_ms: default_poll_interval_ms(),
            deadlock_detection: default_true(),
        }
    }
}

impl Config {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
