/*!
 * Criticality Queues
 * The criticality stack (reserves that raised the system criticality) and
 * the criticality-blocked queue (reserves evicted by a raise, kept for replay)
 */

use super::{Insertion, IntrusiveList, QueueError, QueueKind};
use crate::core::types::{Criticality, Rid};
use crate::reserve::ReserveTable;
use tracing::warn;

/// Descending criticality; a new entry sits above equal ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CritStack {
    list: IntrusiveList,
}

impl CritStack {
    pub const fn new() -> Self {
        Self {
            list: IntrusiveList::new(QueueKind::CritStack),
        }
    }

    #[inline]
    pub const fn top(&self) -> Option<Rid> {
        self.list.head()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.list.len()
    }

    /// Criticality of the top entry, 0 when empty
    pub fn system_criticality(&self, table: &ReserveTable) -> Criticality {
        self.top().map_or(0, |rid| table[rid].criticality)
    }

    pub fn push(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<Insertion, QueueError> {
        let insertion = self.list.insert_by(table, rid, |new, old| {
            new.criticality >= old.criticality
        })?;
        if insertion == Insertion::AlreadyQueued {
            warn!(rid, "Reserve already on criticality stack");
        }
        Ok(insertion)
    }

    pub fn remove(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.remove(table, rid)
    }

    pub fn contains(&self, table: &ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.contains(table, rid)
    }

    pub fn to_vec(&self, table: &ReserveTable) -> Result<Vec<Rid>, QueueError> {
        self.list.to_vec(table)
    }
}

impl Default for CritStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Descending criticality, FIFO among equals, duplicates suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CritBlockedQueue {
    list: IntrusiveList,
}

impl CritBlockedQueue {
    pub const fn new() -> Self {
        Self {
            list: IntrusiveList::new(QueueKind::CritBlocked),
        }
    }

    #[inline]
    pub const fn head(&self) -> Option<Rid> {
        self.list.head()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.list.len()
    }

    pub fn push(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<Insertion, QueueError> {
        self.list
            .insert_by(table, rid, |new, old| new.criticality > old.criticality)
    }

    /// Pop the head if its criticality is at least `floor`
    pub fn pop_at_or_above(
        &mut self,
        table: &mut ReserveTable,
        floor: Criticality,
    ) -> Result<Option<Rid>, QueueError> {
        match self.list.head() {
            Some(rid) if table[rid].criticality >= floor => self.list.pop(table),
            _ => Ok(None),
        }
    }

    pub fn remove(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.remove(table, rid)
    }

    pub fn contains(&self, table: &ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.contains(table, rid)
    }

    pub fn to_vec(&self, table: &ReserveTable) -> Result<Vec<Rid>, QueueError> {
        self.list.to_vec(table)
    }
}

impl Default for CritBlockedQueue {
    fn default() -> Self {
        Self::new()
    }
}
