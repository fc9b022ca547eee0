//! Configuration defaults for advlock.
//!
//! Default value functions used by serde when a field is missing.

use std::path::PathBuf;

/// Directory name used under the system temp dir when no root is configured.
pub const DEFAULT_NAMESPACE_DIR: &str = "advlock-ns";

// Default value functions for serde
pub(crate) fn default_namespace_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_NAMESPACE_DIR)
}
pub(crate) fn default_poll_interval_ms() -> u64 {
    10
}
pub(crate) fn default_true() -> bool {
    true
}
