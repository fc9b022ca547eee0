//! Range resolution and overlap classification.
//!
//! A request's `(whence, start, len)` is turned into an absolute inclusive
//! [`LockRange`]; [`classify`] then decides how an existing range relates to
//! a requested one. The set, clear and get algorithms are all built on these
//! two primitives.

use super::types::{Flock, LockRange, LockRecord, OFF_MAX, OpenFile, Whence};
use crate::error::{LockError, Result};

/// How an existing entry `E` relates to a requested range `C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Disjoint ranges.
    None,
    /// `E == C`.
    Exact,
    /// `E` contains `C`.
    EntryContains,
    /// `C` contains `E`.
    CandidateContains,
    /// `E` starts before `C` and ends inside it.
    EntryLeft,
    /// `E` starts inside `C` and ends after it.
    EntryRight,
}

/// Which entries a scan looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerFilter {
    /// Entries of the candidate's own owner.
    SelfOwned,
    /// Entries of any other owner in the candidate's universe.
    Others,
}

impl OwnerFilter {
    pub fn admits(self, entry: &LockRecord, candidate: &LockRecord) -> bool {
        if entry.universe != candidate.universe {
            return false;
        }
        match self {
            OwnerFilter::SelfOwned => entry.owner == candidate.owner,
            OwnerFilter::Others => entry.owner != candidate.owner,
        }
    }
}

/// `a >= b` where `None` is an unbounded end.
fn reaches(a: Option<u64>, b: Option<u64>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => a >= b,
    }
}

/// Classify existing range `e` against requested range `c`.
pub fn classify(e: &LockRange, c: &LockRange) -> Overlap {
    let disjoint =
        e.end.is_some_and(|ee| c.start > ee) || c.end.is_some_and(|ce| e.start > ce);
    if disjoint {
        return Overlap::None;
    }
    if e.start == c.start && e.end == c.end {
        return Overlap::Exact;
    }
    if e.start <= c.start && reaches(e.end, c.end) {
        return Overlap::EntryContains;
    }
    if c.start <= e.start && reaches(c.end, e.end) {
        return Overlap::CandidateContains;
    }
    if e.start < c.start {
        return Overlap::EntryLeft;
    }
    // Only possibility left for overlapping ranges: E starts inside C and
    // runs past a bounded C.
    debug_assert!(e.start > c.start && c.end.is_some());
    Overlap::EntryRight
}

/// First entry at or after `from` that overlaps `candidate` under `filter`.
pub fn first_overlap<'a, I>(
    entries: I,
    from: usize,
    candidate: &LockRecord,
    filter: OwnerFilter,
) -> Option<(usize, Overlap)>
where
    I: IntoIterator<Item = &'a LockRecord>,
{
    entries
        .into_iter()
        .enumerate()
        .skip(from)
        .filter(|(_, entry)| filter.admits(entry, candidate))
        .map(|(idx, entry)| (idx, classify(&entry.range, &candidate.range)))
        .find(|(_, overlap)| *overlap != Overlap::None)
}

/// First entry that blocks `candidate`: another owner's overlapping lock
/// where at least one side is a write lock.
pub fn first_conflict<'a, I>(entries: I, candidate: &LockRecord) -> Option<LockRecord>
where
    I: IntoIterator<Item = &'a LockRecord>,
{
    entries
        .into_iter()
        .filter(|entry| OwnerFilter::Others.admits(entry, candidate))
        .filter(|entry| classify(&entry.range, &candidate.range) != Overlap::None)
        .find(|entry| entry.excludes(candidate))
        .copied()
}

fn to_offset(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| LockError::Overflow(format!("{} {} too large", what, value)))
}

/// Resolve a request against the file's current size and position.
pub fn resolve(fl: &Flock, file: &OpenFile) -> Result<LockRange> {
    let max = OFF_MAX as i64;
    let start: i64 = match fl.whence {
        Whence::Set => fl.start,
        Whence::Cur => {
            let pos = to_offset(file.position, "file position")?;
            pos.checked_add(fl.start)
                .ok_or_else(|| LockError::Overflow("position + start".to_string()))?
        }
        Whence::End => {
            let size = to_offset(file.size, "file size")?;
            if fl.start > 0 && size > max - fl.start {
                return Err(LockError::Overflow("size + start".to_string()));
            }
            size + fl.start
        }
    };

    if start < 0 {
        return Err(LockError::InvalidRange(format!("negative start {}", start)));
    }

    if fl.len < 0 {
        if start == 0 {
            return Err(LockError::InvalidRange(
                "negative length at offset 0".to_string(),
            ));
        }
        let end = start - 1;
        let new_start = start + fl.len;
        if new_start < 0 {
            return Err(LockError::InvalidRange(format!(
                "length {} reaches before offset 0",
                fl.len
            )));
        }
        return Ok(LockRange::new(new_start as u64, Some(end as u64)));
    }

    if fl.len == 0 {
        return Ok(LockRange::new(start as u64, None));
    }

    let extra = fl.len - 1;
    if extra > max - start {
        return Err(LockError::Overflow("start + len".to_string()));
    }
    Ok(LockRange::new(start as u64, Some((start + extra) as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockf::types::{AccessMode, FileKey, LockKind, Universe};

    fn r(start: u64, end: Option<u64>) -> LockRange {
        LockRange::new(start, end)
    }

    fn rec(owner: u64, kind: LockKind, range: LockRange) -> LockRecord {
        LockRecord {
            universe: Universe::Posix,
            kind,
            range,
            owner,
            holder_pid: owner as u32,
        }
    }

    fn file() -> OpenFile {
        OpenFile::new(FileKey::new(1, 2), AccessMode::READ_WRITE, 7)
            .with_size(1000)
            .with_position(100)
    }

    #[test]
    fn classify_disjoint() {
        assert_eq!(classify(&r(0, Some(9)), &r(10, Some(20))), Overlap::None);
        assert_eq!(classify(&r(21, None), &r(10, Some(20))), Overlap::None);
    }

    #[test]
    fn classify_exact() {
        assert_eq!(classify(&r(5, Some(9)), &r(5, Some(9))), Overlap::Exact);
        assert_eq!(classify(&r(5, None), &r(5, None)), Overlap::Exact);
    }

    #[test]
    fn classify_entry_contains() {
        assert_eq!(
            classify(&r(0, None), &r(10, Some(20))),
            Overlap::EntryContains
        );
        assert_eq!(
            classify(&r(10, Some(30)), &r(10, Some(20))),
            Overlap::EntryContains
        );
        // Unbounded entry that starts earlier contains an unbounded request.
        assert_eq!(classify(&r(0, None), &r(10, None)), Overlap::EntryContains);
    }

    #[test]
    fn classify_candidate_contains() {
        assert_eq!(
            classify(&r(10, Some(20)), &r(0, None)),
            Overlap::CandidateContains
        );
        assert_eq!(
            classify(&r(10, Some(20)), &r(10, Some(30))),
            Overlap::CandidateContains
        );
    }

    #[test]
    fn classify_partial_overlaps() {
        assert_eq!(
            classify(&r(0, Some(15)), &r(10, Some(20))),
            Overlap::EntryLeft
        );
        assert_eq!(
            classify(&r(15, Some(30)), &r(10, Some(20))),
            Overlap::EntryRight
        );
        assert_eq!(classify(&r(15, None), &r(10, Some(20))), Overlap::EntryRight);
    }

    #[test]
    fn conflict_requires_a_write_side() {
        let held = [rec(1, LockKind::Read, r(0, Some(99)))];
        let reader = rec(2, LockKind::Read, r(50, Some(60)));
        let writer = rec(2, LockKind::Write, r(50, Some(60)));

        assert_eq!(first_conflict(&held, &reader), None);
        assert_eq!(first_conflict(&held, &writer), Some(held[0]));
    }

    #[test]
    fn own_locks_never_conflict() {
        let held = [rec(1, LockKind::Write, r(0, None))];
        let again = rec(1, LockKind::Write, r(10, Some(20)));
        assert_eq!(first_conflict(&held, &again), None);
    }

    #[test]
    fn universes_never_conflict() {
        let mut flock = rec(1, LockKind::Write, r(0, None));
        flock.universe = Universe::Flock;
        let posix = rec(2, LockKind::Write, r(0, None));
        assert_eq!(first_conflict(&[flock], &posix), None);
    }

    #[test]
    fn first_overlap_skips_from_and_foreign_owners() {
        let list = [
            rec(1, LockKind::Read, r(0, Some(9))),
            rec(2, LockKind::Read, r(10, Some(19))),
            rec(1, LockKind::Read, r(20, Some(29))),
        ];
        let cand = rec(1, LockKind::Write, r(0, None));

        assert_eq!(
            first_overlap(&list, 0, &cand, OwnerFilter::SelfOwned),
            Some((0, Overlap::CandidateContains))
        );
        assert_eq!(
            first_overlap(&list, 1, &cand, OwnerFilter::SelfOwned),
            Some((2, Overlap::CandidateContains))
        );
        assert_eq!(
            first_overlap(&list, 0, &cand, OwnerFilter::Others),
            Some((1, Overlap::CandidateContains))
        );
    }

    #[test]
    fn resolve_from_set() {
        let fl = Flock::new(LockKind::Write, Whence::Set, 0, 100);
        assert_eq!(resolve(&fl, &file()).unwrap(), r(0, Some(99)));
    }

    #[test]
    fn resolve_zero_len_is_unbounded() {
        let fl = Flock::new(LockKind::Read, Whence::Set, 10, 0);
        assert_eq!(resolve(&fl, &file()).unwrap(), r(10, None));
    }

    #[test]
    fn resolve_relative_to_position_and_size() {
        let cur = Flock::new(LockKind::Write, Whence::Cur, 5, 10);
        assert_eq!(resolve(&cur, &file()).unwrap(), r(105, Some(114)));

        let end = Flock::new(LockKind::Write, Whence::End, -10, 10);
        assert_eq!(resolve(&end, &file()).unwrap(), r(990, Some(999)));
    }

    #[test]
    fn resolve_negative_len_covers_preceding_bytes() {
        let fl = Flock::new(LockKind::Write, Whence::Set, 100, -10);
        assert_eq!(resolve(&fl, &file()).unwrap(), r(90, Some(99)));
    }

    #[test]
    fn resolve_rejects_negative_ranges() {
        let neg_start = Flock::new(LockKind::Write, Whence::Set, -1, 10);
        assert!(matches!(
            resolve(&neg_start, &file()),
            Err(LockError::InvalidRange(_))
        ));

        let neg_len_at_zero = Flock::new(LockKind::Write, Whence::Set, 0, -1);
        assert!(matches!(
            resolve(&neg_len_at_zero, &file()),
            Err(LockError::InvalidRange(_))
        ));

        let before_zero = Flock::new(LockKind::Write, Whence::Set, 5, -10);
        assert!(matches!(
            resolve(&before_zero, &file()),
            Err(LockError::InvalidRange(_))
        ));
    }

    #[test]
    fn resolve_rejects_overflow() {
        let fl = Flock::new(LockKind::Write, Whence::Set, i64::MAX, 2);
        assert!(matches!(resolve(&fl, &file()), Err(LockError::Overflow(_))));

        let end = Flock::new(LockKind::Write, Whence::End, i64::MAX, 1);
        assert!(matches!(resolve(&end, &file()), Err(LockError::Overflow(_))));
    }

    #[test]
    fn resolve_last_byte_fits() {
        let fl = Flock::new(LockKind::Write, Whence::Set, i64::MAX, 1);
        assert_eq!(
            resolve(&fl, &file()).unwrap(),
            r(OFF_MAX, Some(OFF_MAX))
        );
    }
}
