//! Names of per-file namespace directories and published lock objects.
//!
//! A lock object's name is the whole lock description, so enumerating a
//! file's directory is enough to rebuild every lock any process holds on it:
//!
//! ```text
//! <flags:2>-<type:1>-<start:16>-<end:16>-<owner:16>-<holder_pid:8>
//! ```
//!
//! All fields are hexadecimal. `end` is `FFFFFFFFFFFFFFFF` for "to EOF".

use super::types::{FileKey, LockKind, LockRange, LockRecord, OFF_MAX, Universe};

/// Exact length of a lock object name.
pub const OBJECT_NAME_LEN: usize = 64;

/// Name of the per-file mutex inside a domain directory.
pub const MUTEX_NAME: &str = "mtx";

const FIELD_WIDTHS: [usize; 6] = [2, 1, 16, 16, 16, 8];

/// Directory name for a file's lock domain.
pub fn dir_name(key: FileKey) -> String {
    format!("{:08x}-{:016X}", key.device, key.inode)
}

/// Object name publishing `record`.
pub fn object_name(record: &LockRecord) -> String {
    let end = record.range.end.unwrap_or(u64::MAX);
    format!(
        "{:02x}-{:01x}-{:016X}-{:016X}-{:016X}-{:08x}",
        record.universe.flags(),
        record.kind.code(),
        record.range.start,
        end,
        record.owner,
        record.holder_pid
    )
}

/// Parse an object name back into a lock record.
///
/// Returns `None` for anything that isn't a well-formed lock name, so
/// foreign entries in the directory are skipped.
pub fn parse_object_name(name: &str) -> Option<LockRecord> {
    if name.len() != OBJECT_NAME_LEN {
        return None;
    }
    let fields: Vec<&str> = name.split('-').collect();
    if fields.len() != FIELD_WIDTHS.len()
        || fields
            .iter()
            .zip(FIELD_WIDTHS)
            .any(|(field, width)| field.len() != width)
    {
        return None;
    }

    let universe = Universe::from_flags(u8::from_str_radix(fields[0], 16).ok()?)?;
    let kind = match LockKind::from_code(u8::from_str_radix(fields[1], 16).ok()?)? {
        LockKind::Unlock => return None,
        kind => kind,
    };
    let start = u64::from_str_radix(fields[2], 16).ok()?;
    if start > OFF_MAX {
        return None;
    }
    let end = match u64::from_str_radix(fields[3], 16).ok()? {
        u64::MAX => None,
        end if end < start || end > OFF_MAX => return None,
        end => Some(end),
    };
    let owner = u64::from_str_radix(fields[4], 16).ok()?;
    let holder_pid = u32::from_str_radix(fields[5], 16).ok()?;

    Some(LockRecord {
        universe,
        kind,
        range: LockRange::new(start, end),
        owner,
        holder_pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LockRecord {
        LockRecord {
            universe: Universe::Posix,
            kind: LockKind::Write,
            range: LockRange::new(0x10, Some(0x1f)),
            owner: 4242,
            holder_pid: 0xbeef,
        }
    }

    #[test]
    fn dir_name_format() {
        assert_eq!(
            dir_name(FileKey::new(0x2a, 0xabc)),
            "0000002a-0000000000000ABC"
        );
    }

    #[test]
    fn object_name_format() {
        let name = object_name(&sample());
        assert_eq!(name.len(), OBJECT_NAME_LEN);
        assert_eq!(
            name,
            "40-2-0000000000000010-000000000000001F-0000000000001092-0000beef"
        );
    }

    #[test]
    fn unbounded_end_is_all_ones() {
        let mut record = sample();
        record.range = LockRange::new(5, None);
        record.universe = Universe::Flock;
        let name = object_name(&record);
        assert!(name.starts_with("20-2-0000000000000005-FFFFFFFFFFFFFFFF-"));
        assert_eq!(parse_object_name(&name), Some(record));
    }

    #[test]
    fn parse_reads_back_published_fields() {
        let record = sample();
        assert_eq!(parse_object_name(&object_name(&record)), Some(record));
    }

    #[test]
    fn parse_tolerates_wait_bit() {
        let name = object_name(&sample()).replacen("40", "50", 1);
        assert_eq!(parse_object_name(&name), Some(sample()));
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert_eq!(parse_object_name(MUTEX_NAME), None);
        assert_eq!(parse_object_name("mtx.lock"), None);

        let name = object_name(&sample());
        // Both universe bits set.
        assert_eq!(parse_object_name(&name.replacen("40", "60", 1)), None);
        // Unknown flag bit.
        assert_eq!(parse_object_name(&name.replacen("40", "41", 1)), None);
        // Unlock is never published.
        assert_eq!(parse_object_name(&name.replacen("-2-", "-3-", 1)), None);
        // Waiter marker suffix.
        assert_eq!(parse_object_name(&format!("{}.w1-0", name)), None);
    }

    #[test]
    fn parse_rejects_inverted_range() {
        let mut record = sample();
        record.range = LockRange::new(0x20, Some(0x10));
        assert_eq!(parse_object_name(&object_name(&record)), None);
    }
}
