//! Metadata stored in a directory namespace mutex file.

use crate::error::{LockError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Who holds a `mtx.lock` file, so a mutex left behind by a dead process
/// can be recognized and broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutexMetadata {
    /// Owner of the mutex (e.g., `user@HOST`).
    pub owner: String,

    /// Host process id of the mutex holder.
    pub pid: u32,

    /// Timestamp when the mutex was taken (RFC3339).
    pub created_at: DateTime<Utc>,
}

impl MutexMetadata {
    /// Create metadata for `pid` with the current timestamp.
    pub fn new(pid: u32) -> Self {
        Self {
            owner: get_owner_string(),
            pid,
            created_at: Utc::now(),
        }
    }

    /// Parse mutex metadata from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            LockError::sync(&format!("read mutex '{}'", path.as_ref().display()), e)
        })?;

        serde_json::from_str(&content).map_err(|e| {
            LockError::sync(&format!("parse mutex '{}'", path.as_ref().display()), e)
        })
    }

    /// Serialize metadata to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LockError::sync("serialize mutex metadata", e))
    }

    /// How long the mutex has been held.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let seconds = age.num_seconds();
        let minutes = age.num_minutes();
        let hours = age.num_hours();

        if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds % 60)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// Get the owner string for mutex metadata.
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
