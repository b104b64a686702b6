/*!
 * Rate-Monotonic Queue
 * Every created reserve in ascending period order; source of the
 * rate-monotonic priority assignment
 */

use super::{Insertion, IntrusiveList, QueueError, QueueKind};
use crate::core::limits::{DAEMON_PRIORITY, MIN_PRIORITY};
use crate::core::types::{Priority, Rid};
use crate::reserve::ReserveTable;
use tracing::{error, warn};

/// Result of a priority pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityAssignment {
    /// Priority given to the shortest period
    pub top: Priority,
    /// (rid, priority) in period order
    pub assigned: Vec<(Rid, Priority)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateMonotonicQueue {
    list: IntrusiveList,
}

impl RateMonotonicQueue {
    pub const fn new() -> Self {
        Self {
            list: IntrusiveList::new(QueueKind::RateMonotonic),
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

    /// Ascending period; equal periods keep creation order
    pub fn insert(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<Insertion, QueueError> {
        let insertion = self.list.insert_by(table, rid, |new, old| {
            new.period.ticks < old.period.ticks
        })?;
        if insertion == Insertion::AlreadyQueued {
            warn!(rid, "Reserve already in rate-monotonic queue");
        }
        Ok(insertion)
    }

    pub fn remove(&mut self, table: &mut ReserveTable, rid: Rid) -> Result<bool, QueueError> {
        self.list.remove(table, rid)
    }

    pub fn to_vec(&self, table: &ReserveTable) -> Result<Vec<Rid>, QueueError> {
        self.list.to_vec(table)
    }

    /// Assign strictly decreasing priorities along the queue
    ///
    /// The shortest period gets `MIN_PRIORITY + len`, the longest `MIN_PRIORITY + 1`.
    pub fn assign_priorities(
        &self,
        table: &mut ReserveTable,
    ) -> Result<PriorityAssignment, QueueError> {
        let order = self.list.to_vec(table)?;
        let top = MIN_PRIORITY + order.len() as Priority;
        if top >= DAEMON_PRIORITY {
            warn!(
                top,
                daemon = DAEMON_PRIORITY,
                "Reserve priorities reach the worker priority"
            );
        }

        let mut next = top;
        let mut assigned = Vec::with_capacity(order.len());
        for rid in order {
            if next <= 0 {
                error!(rid, priority = next, "Non-positive rate-monotonic priority");
            }
            table[rid].priority = next;
            assigned.push((rid, next));
            next -= 1;
        }

        Ok(PriorityAssignment { top, assigned })
    }
}

impl Default for RateMonotonicQueue {
    fn default() -> Self {
        Self::new()
    }
}
