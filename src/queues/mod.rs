/*!
 * Ordered Queues
 *
 * Intrusive singly-linked lists over the reserve table. A list stores only
 * its head; each reserve stores its own successor per list. Every walk is
 * bounded by the table capacity, so a cycle surfaces as a corruption error
 * instead of a hang.
 */

mod criticality;
mod rate_monotonic;
mod ready;

pub use criticality::{CritBlockedQueue, CritStack};
pub use rate_monotonic::{PriorityAssignment, RateMonotonicQueue};
pub use ready::ReadyQueue;

use crate::core::errors::SchedulerError;
use crate::core::types::Rid;
use crate::reserve::{Reserve, ReserveTable};
use std::fmt;

/// Which link field a list threads through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Ready,
    RateMonotonic,
    CritStack,
    CritBlocked,
}

impl QueueKind {
    pub const fn name(&self) -> &'static str {
        match self {
            QueueKind::Ready => "ready",
            QueueKind::RateMonotonic => "rate_monotonic",
            QueueKind::CritStack => "crit_stack",
            QueueKind::CritBlocked => "crit_blocked",
        }
    }

    #[inline]
    fn link(&self, reserve: &Reserve) -> Option<Rid> {
        match self {
            QueueKind::Ready => reserve.links.next,
            QueueKind::RateMonotonic => reserve.links.rm_next,
            QueueKind::CritStack => reserve.links.crit_next,
            QueueKind::CritBlocked => reserve.links.crit_block_next,
        }
    }

    #[inline]
    fn link_mut<'a>(&self, reserve: &'a mut Reserve) -> &'a mut Option<Rid> {
        match self {
            QueueKind::Ready => &mut reserve.links.next,
            QueueKind::RateMonotonic => &mut reserve.links.rm_next,
            QueueKind::CritStack => &mut reserve.links.crit_next,
            QueueKind::CritBlocked => &mut reserve.links.crit_block_next,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structural queue failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Walk exceeded the table capacity, or a link points outside the table
    #[error("{0} queue corrupted")]
    Corrupted(QueueKind),
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Corrupted(kind) => SchedulerError::QueueCorrupted(kind.name().into()),
        }
    }
}

/// Where an insertion landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// New head; carries the previous head
    Head { previous: Option<Rid> },
    /// Behind an existing entry
    After(Rid),
    /// Already present, nothing changed
    AlreadyQueued,
}

impl Insertion {
    #[inline]
    pub fn is_new_head(&self) -> bool {
        matches!(self, Insertion::Head { .. })
    }
}

/// Head of one intrusive list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrusiveList {
    kind: QueueKind,
    head: Option<Rid>,
    len: usize,
}

impl IntrusiveList {
    pub const fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            head: None,
            len: 0,
        }
    }

    #[inline]
    pub const fn kind(&self) -> QueueKind {
        self.kind
    }

    #[inline]
    pub const fn head(&self) -> Option<Rid> {
        self.head
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Successor of `rid`, range-checked
    fn successor(&self, table: &ReserveTable, rid: Rid) -> Result<Option<Rid>, QueueError> {
        let reserve = table.get(rid).ok_or(QueueError::Corrupted(self.kind))?;
        Ok(self.kind.link(reserve))
    }

    /// Members in list order
    pub fn to_vec(&self, table: &ReserveTable) -> Result<Vec<Rid>, QueueError> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(rid) = cursor {
            if out.len() >= table.capacity() {
                return Err(QueueError::Corrupted(self.kind));
            }
            out.push(rid);
            cursor = self.successor(table, rid)?;
        }
        Ok(out)
    }

    pub fn contains(&self, table: &ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        let mut cursor = self.head;
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == rid {
                return Ok(true);
            }
            steps += 1;
            if steps > table.capacity() {
                return Err(QueueError::Corrupted(self.kind));
            }
            cursor = self.successor(table, current)?;
        }
        Ok(false)
    }

    /// Insert `rid` before the first entry `goes_before(new, existing)` accepts
    ///
    /// Duplicates are a no-op reported as [`Insertion::AlreadyQueued`].
    pub fn insert_by<F>(
        &mut self,
        table: &mut ReserveTable,
        rid: Rid,
        goes_before: F,
    ) -> Result<Insertion, QueueError>
    where
        F: Fn(&Reserve, &Reserve) -> bool,
    {
        if table.get(rid).is_none() {
            return Err(QueueError::Corrupted(self.kind));
        }
        if self.contains(table, rid)? {
            return Ok(Insertion::AlreadyQueued);
        }

        let kind = self.kind;
        let head = match self.head {
            Some(head) if !goes_before(&table[rid], &table[head]) => head,
            previous => {
                *kind.link_mut(&mut table[rid]) = previous;
                self.head = Some(rid);
                self.len += 1;
                return Ok(Insertion::Head { previous });
            }
        };

        let mut prev = head;
        let mut steps = 0;
        loop {
            let next = self.successor(table, prev)?;
            match next {
                Some(candidate) if !goes_before(&table[rid], &table[candidate]) => {
                    prev = candidate;
                }
                _ => {
                    *kind.link_mut(&mut table[rid]) = next;
                    *kind.link_mut(&mut table[prev]) = Some(rid);
                    self.len += 1;
                    return Ok(Insertion::After(prev));
                }
            }
            steps += 1;
            if steps > table.capacity() {
                return Err(QueueError::Corrupted(kind));
            }
        }
    }

    /// Unlink by identity; `Ok(false)` when absent
    pub fn remove(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        let kind = self.kind;
        let Some(head) = self.head else {
            return Ok(false);
        };

        if head == rid {
            self.head = self.successor(table, rid)?;
            *kind.link_mut(&mut table[rid]) = None;
            self.len = self.len.saturating_sub(1);
            return Ok(true);
        }

        let mut prev = head;
        let mut steps = 0;
        while let Some(current) = self.successor(table, prev)? {
            if current == rid {
                let after = kind.link(&table[rid]);
                *kind.link_mut(&mut table[prev]) = after;
                *kind.link_mut(&mut table[rid]) = None;
                self.len = self.len.saturating_sub(1);
                return Ok(true);
            }
            prev = current;
            steps += 1;
            if steps > table.capacity() {
                return Err(QueueError::Corrupted(kind));
            }
        }
        Ok(false)
    }

    /// Detach and return the head
    pub fn pop(&mut self, table: &mut ReserveTable) -> Result<Option<Rid>, QueueError> {
        match self.head {
            Some(head) => {
                self.remove(table, head)?;
                Ok(Some(head))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table_with(n: usize) -> ReserveTable {
        let mut table = ReserveTable::with_capacity(n);
        for _ in 0..n {
            table.allocate();
        }
        table
    }

    #[test]
    fn test_insert_remove_pop() {
        let mut table = table_with(4);
        for (rid, crit) in [(0, 1), (1, 3), (2, 2), (3, 3)] {
            table[rid].criticality = crit;
        }

        let mut list = IntrusiveList::new(QueueKind::CritBlocked);
        for rid in 0..4 {
            list.insert_by(&mut table, rid, |new, old| new.criticality > old.criticality)
                .unwrap();
        }
        assert_eq!(list.to_vec(&table).unwrap(), vec![1, 3, 2, 0]);
        assert_eq!(list.len(), 4);

        assert!(list.remove(&mut table, 3).unwrap());
        assert!(!list.remove(&mut table, 3).unwrap());
        assert_eq!(list.pop(&mut table).unwrap(), Some(1));
        assert_eq!(list.to_vec(&table).unwrap(), vec![2, 0]);
        assert_eq!(table[1].links.crit_block_next, None);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut table = table_with(2);
        let mut list = IntrusiveList::new(QueueKind::Ready);
        list.insert_by(&mut table, 0, |_, _| false).unwrap();
        assert_eq!(
            list.insert_by(&mut table, 0, |_, _| false).unwrap(),
            Insertion::AlreadyQueued
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut table = table_with(2);
        let mut list = IntrusiveList::new(QueueKind::Ready);
        list.insert_by(&mut table, 0, |_, _| false).unwrap();
        list.insert_by(&mut table, 1, |_, _| false).unwrap();
        // Corrupt: tail points back at head
        table[1].links.next = Some(0);

        assert_eq!(
            list.to_vec(&table),
            Err(QueueError::Corrupted(QueueKind::Ready))
        );
        assert!(list.contains(&table, 7).is_err());
    }
}
