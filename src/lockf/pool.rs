//! Spare-record reservation for list mutations.
//!
//! Splitting an entry in two while walking the held list needs a record that
//! didn't exist before the walk started. Capacity for it is reserved up
//! front, so a mutation that has begun can't fail halfway for lack of
//! memory and leave the list half-updated.

use crate::error::{LockError, Result};
use tracing::debug;

/// Slots reserved in a list before a mutating walk.
///
/// Slots not consumed by [`Spare::push`] are simply left as spare capacity.
#[derive(Debug)]
pub(crate) struct Spare {
    slots: usize,
}

impl Spare {
    /// Reserve room for `slots` more elements in `list`.
    pub(crate) fn reserve<T>(list: &mut Vec<T>, slots: usize) -> Result<Self> {
        list.try_reserve(slots).map_err(|e| {
            debug!(slots, error = %e, "could not reserve spare lock records");
            LockError::ResourceExhausted
        })?;
        Ok(Self { slots })
    }

    /// Append `item` using a reserved slot.
    pub(crate) fn push<T>(&mut self, list: &mut Vec<T>, item: T) {
        debug_assert!(self.slots > 0, "pushed past the reserved spare records");
        self.slots = self.slots.saturating_sub(1);
        list.push(item);
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> usize {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_pushes_do_not_reallocate() {
        let mut list: Vec<u64> = vec![1];
        let mut spare = Spare::reserve(&mut list, 2).unwrap();
        let capacity = list.capacity();

        spare.push(&mut list, 2);
        spare.push(&mut list, 3);

        assert_eq!(list, vec![1, 2, 3]);
        assert_eq!(list.capacity(), capacity);
        assert_eq!(spare.remaining(), 0);
    }

    #[test]
    fn unused_slots_are_left_over() {
        let mut list: Vec<u64> = Vec::new();
        let spare = Spare::reserve(&mut list, 1).unwrap();
        assert_eq!(spare.remaining(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn impossible_reservation_is_resource_exhaustion() {
        let mut list: Vec<u64> = Vec::new();
        assert_eq!(
            Spare::reserve(&mut list, usize::MAX).unwrap_err(),
            LockError::ResourceExhausted
        );
    }
}
