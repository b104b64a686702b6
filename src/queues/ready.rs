/*!
 * Ready Queue
 * Reserves eligible to run, highest priority first; the head is running
 */

use super::{Insertion, IntrusiveList, QueueError, QueueKind};
use crate::core::types::Rid;
use crate::reserve::ReserveTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyQueue {
    list: IntrusiveList,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            list: IntrusiveList::new(QueueKind::Ready),
        }
    }

    #[inline]
    pub const fn head(&self) -> Option<Rid> {
        self.list.head()
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Before the first strictly lower priority; FIFO among equals
    pub fn insert(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<Insertion, QueueError> {
        self.list
            .insert_by(table, rid, |new, old| new.priority > old.priority)
    }

    pub fn remove(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.remove(table, rid)
    }

    /// Unlink the head
    pub fn pop(&mut self, table: &mut ReserveTable) -> Result<Option<Rid>, QueueError> {
        self.list.pop(table)
    }

    pub fn contains(&self, table: &ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.contains(table, rid)
    }

    pub fn to_vec(&self, table: &ReserveTable) -> Result<Vec<Rid>, QueueError> {
        self.list.to_vec(table)
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
