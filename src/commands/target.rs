//! Resolving a path on the command line to a lockable file.

use advlock::error::{LockError, Result};
use advlock::lockf::{AccessMode, FileKey, LockEngine, OpenFile};
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// An open file and the descriptor-table view the engine needs of it.
#[derive(Debug)]
pub struct Target {
    /// Kept open for as long as locks are held through it.
    _file: File,
    pub open: OpenFile,
}

impl Target {
    /// Open `path`, for writing too if `write` is set.
    pub fn open(path: &Path, write: bool, engine: &LockEngine) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .open(path)
            .map_err(|e| LockError::Io(format!("failed to open '{}': {}", path.display(), e)))?;
        let meta = file
            .metadata()
            .map_err(|e| LockError::Io(format!("failed to stat '{}': {}", path.display(), e)))?;

        let access = if write {
            AccessMode::READ_WRITE
        } else {
            AccessMode::READ_ONLY
        };
        let open = OpenFile::new(file_key(path, &meta)?, access, engine.new_open_file_id())
            .with_size(meta.len());
        Ok(Self { _file: file, open })
    }
}

/// Identity of the file at `path`.
#[cfg(unix)]
pub fn file_key(_path: &Path, meta: &fs::Metadata) -> Result<FileKey> {
    use std::os::unix::fs::MetadataExt;
    Ok(FileKey::new(meta.dev() as u32, meta.ino()))
}

/// Identity of the file at `path`: a stable hash of its canonical path.
#[cfg(not(unix))]
pub fn file_key(path: &Path, _meta: &fs::Metadata) -> Result<FileKey> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let canonical = fs::canonicalize(path)
        .map_err(|e| LockError::Io(format!("failed to resolve '{}': {}", path.display(), e)))?;
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    Ok(FileKey::new(0, hasher.finish()))
}

/// Identity of the file at `path` without opening it.
pub fn key_of(path: &Path) -> Result<FileKey> {
    let meta = fs::metadata(path)
        .map_err(|e| LockError::Io(format!("failed to stat '{}': {}", path.display(), e)))?;
    file_key(path, &meta)
}
