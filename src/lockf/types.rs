//! Lock record and request type definitions.

use std::fmt;

/// Largest byte offset a lock may cover (`OFF_MAX`).
pub const OFF_MAX: u64 = i64::MAX as u64;

/// Identity of a locked file: the domain every lock on it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    /// Device the file lives on.
    pub device: u32,
    /// Inode number on that device.
    pub inode: u64,
}

impl FileKey {
    pub fn new(device: u32, inode: u64) -> Self {
        Self { device, inode }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}", self.device, self.inode)
    }
}

/// Locking semantics a record belongs to.
///
/// Records of different universes never conflict with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Universe {
    /// `fcntl` byte-range locks, owned per process.
    Posix,
    /// `flock`/`lockf` locks, owned per open file description.
    Flock,
}

impl Universe {
    /// Wait bit of the published flags byte; never set on our own objects.
    pub const F_WAIT: u8 = 0x10;
    /// Flags bit for the FLOCK universe.
    pub const F_FLOCK: u8 = 0x20;
    /// Flags bit for the POSIX universe.
    pub const F_POSIX: u8 = 0x40;

    /// Flags byte published in the object name.
    pub fn flags(self) -> u8 {
        match self {
            Universe::Posix => Self::F_POSIX,
            Universe::Flock => Self::F_FLOCK,
        }
    }

    /// Decode a flags byte, rejecting unknown bits and ambiguous universes.
    pub fn from_flags(flags: u8) -> Option<Self> {
        if flags & !(Self::F_WAIT | Self::F_FLOCK | Self::F_POSIX) != 0 {
            return None;
        }
        match flags & (Self::F_FLOCK | Self::F_POSIX) {
            Self::F_POSIX => Some(Universe::Posix),
            Self::F_FLOCK => Some(Universe::Flock),
            _ => None,
        }
    }
}

impl fmt::Display for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Universe::Posix => write!(f, "posix"),
            Universe::Flock => write!(f, "flock"),
        }
    }
}

/// Lock type (`l_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Shared lock (`F_RDLCK`).
    Read,
    /// Exclusive lock (`F_WRLCK`).
    Write,
    /// No lock (`F_UNLCK`).
    Unlock,
}

impl LockKind {
    pub const F_RDLCK: u8 = 1;
    pub const F_WRLCK: u8 = 2;
    pub const F_UNLCK: u8 = 3;

    pub fn code(self) -> u8 {
        match self {
            LockKind::Read => Self::F_RDLCK,
            LockKind::Write => Self::F_WRLCK,
            LockKind::Unlock => Self::F_UNLCK,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            Self::F_RDLCK => Some(LockKind::Read),
            Self::F_WRLCK => Some(LockKind::Write),
            Self::F_UNLCK => Some(LockKind::Unlock),
            _ => None,
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
            LockKind::Unlock => write!(f, "unlock"),
        }
    }
}

/// Absolute, inclusive byte range. `end == None` extends to EOF and beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl LockRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Range covering the whole file.
    pub fn whole_file() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }

    /// Length as reported by `F_GETLK`: 0 for "to EOF".
    pub fn len(&self) -> i64 {
        match self.end {
            Some(end) => (end - self.start + 1) as i64,
            None => 0,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end.is_none()
    }
}

impl fmt::Display for LockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {}]", self.start, end),
            None => write!(f, "[{}, EOF)", self.start),
        }
    }
}

/// One lock as published in the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRecord {
    pub universe: Universe,
    pub kind: LockKind,
    pub range: LockRange,
    /// Process id (POSIX) or open file description id (FLOCK).
    pub owner: u64,
    /// Host process that holds the published object; watched for liveness.
    pub holder_pid: u32,
}

impl LockRecord {
    /// Whether `other` must wait for this record when both overlap.
    pub fn excludes(&self, other: &LockRecord) -> bool {
        self.kind == LockKind::Write || other.kind == LockKind::Write
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} owner={:#x} holder={}",
            self.universe, self.kind, self.range, self.owner, self.holder_pid
        )
    }
}

/// Origin for `Flock::start` (`l_whence`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    #[default]
    Set,
    Cur,
    End,
}

/// Lock description as passed to and returned from `fcntl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flock {
    pub kind: LockKind,
    pub whence: Whence,
    pub start: i64,
    /// 0 means "to EOF"; negative lengths cover bytes before `start`.
    pub len: i64,
    /// Filled in by `F_GETLK`; -1 for conflicts without a process identity.
    pub pid: i32,
}

impl Flock {
    pub fn new(kind: LockKind, whence: Whence, start: i64, len: i64) -> Self {
        Self {
            kind,
            whence,
            start,
            len,
            pid: 0,
        }
    }

    /// Whole-file lock of the given type.
    pub fn whole_file(kind: LockKind) -> Self {
        Self::new(kind, Whence::Set, 0, 0)
    }
}

/// Dispatcher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    /// Set a lock, failing with `WouldBlock` on conflict.
    SetLk,
    /// Set a lock, waiting for conflicting locks to go away.
    SetLkW,
    /// Report the first conflicting lock.
    GetLk,
    /// Remove locks over a range.
    Unlock,
}

impl LockOp {
    pub fn waits(self) -> bool {
        self == LockOp::SetLkW
    }
}

/// Read/write permissions of the descriptor a request comes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode {
    pub read: bool,
    pub write: bool,
}

impl AccessMode {
    pub const READ_ONLY: AccessMode = AccessMode {
        read: true,
        write: false,
    };
    pub const WRITE_ONLY: AccessMode = AccessMode {
        read: false,
        write: true,
    };
    pub const READ_WRITE: AccessMode = AccessMode {
        read: true,
        write: true,
    };

    /// Whether a lock of `kind` may be set through this descriptor.
    pub fn permits(self, kind: LockKind) -> bool {
        match kind {
            LockKind::Read => self.read,
            LockKind::Write => self.write,
            LockKind::Unlock => true,
        }
    }
}

/// What the descriptor table knows about the file a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub key: FileKey,
    pub access: AccessMode,
    /// Current file size, for `SEEK_END`.
    pub size: u64,
    /// Current file position, for `SEEK_CUR`.
    pub position: u64,
    /// Open file description id; owner of FLOCK-universe locks.
    pub open_id: u64,
}

impl OpenFile {
    pub fn new(key: FileKey, access: AccessMode, open_id: u64) -> Self {
        Self {
            key,
            access,
            size: 0,
            position: 0,
            open_id,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }
}

/// Ids a process locks under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    /// POSIX process id; owner of POSIX-universe locks and `F_GETLK` pid.
    pub pid: u32,
    /// Host process id waiters watch for liveness.
    pub holder_pid: u32,
}

impl ProcessIdentity {
    pub fn new(pid: u32, holder_pid: u32) -> Self {
        Self { pid, holder_pid }
    }

    /// Identity of the running OS process.
    pub fn current() -> Self {
        let pid = std::process::id();
        Self::new(pid, pid)
    }
}
