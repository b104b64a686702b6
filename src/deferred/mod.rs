/*!
 * Deferred Work
 *
 * Timer handlers never touch task state directly. They push reserve ids onto
 * one of two bounded queues and a dedicated worker performs the wake,
 * suspend, priority and affinity changes later:
 *
 * - reschedule: stop (enforce) or restart a reserve
 * - activate: bind to the worker core once, then apply the RM priority
 */

mod worker;

pub use worker::{DeferredWorker, WorkerCommand};

use crate::core::errors::SchedulerError;
use crate::core::types::{Rid, SchedResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Which deferred queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredKind {
    Reschedule,
    Activate,
}

impl DeferredKind {
    pub const fn name(&self) -> &'static str {
        match self {
            DeferredKind::Reschedule => "reschedule",
            DeferredKind::Activate => "activate",
        }
    }
}

impl fmt::Display for DeferredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One queued piece of work
///
/// Stamped with the slot's incarnation when queued; an entry whose slot was
/// freed and handed to a new reserve in the meantime no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub rid: Rid,
    pub incarnation: u64,
}

impl DeferredEntry {
    pub const fn new(rid: Rid, incarnation: u64) -> Self {
        Self { rid, incarnation }
    }
}

/// Bounded multi-producer queue of reserve ids
///
/// # Performance
/// - Push never blocks: a full queue is reported, not waited on
/// - Cloned receivers share one channel, so a worker task and a synchronous
///   drain can coexist
#[derive(Debug, Clone)]
pub struct DeferredQueue {
    kind: DeferredKind,
    capacity: usize,
    tx: flume::Sender<DeferredEntry>,
    rx: flume::Receiver<DeferredEntry>,
}

impl DeferredQueue {
    pub fn bounded(kind: DeferredKind, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            kind,
            capacity,
            tx,
            rx,
        }
    }

    #[inline]
    pub const fn kind(&self) -> DeferredKind {
        self.kind
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without blocking
    pub fn push(&self, entry: DeferredEntry) -> SchedResult<()> {
        self.tx.try_send(entry).map_err(|e| match e {
            flume::TrySendError::Full(_) => {
                warn!(queue = %self.kind, rid = entry.rid, "deferred queue full, dropping entry");
                SchedulerError::QueueFull(self.kind.name().to_string())
            }
            flume::TrySendError::Disconnected(_) => {
                SchedulerError::QueueFull(format!("{} (disconnected)", self.kind))
            }
        })
    }

    pub fn try_pop(&self) -> Option<DeferredEntry> {
        self.rx.try_recv().ok()
    }

    /// Receiver handle for a worker task
    pub fn receiver(&self) -> flume::Receiver<DeferredEntry> {
        self.rx.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_queue_is_reported() {
        let queue = DeferredQueue::bounded(DeferredKind::Reschedule, 2);
        queue.push(DeferredEntry::new(1, 0)).unwrap();
        queue.push(DeferredEntry::new(2, 0)).unwrap();
        assert!(matches!(
            queue.push(DeferredEntry::new(3, 0)),
            Err(SchedulerError::QueueFull(_))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_drain() {
        let queue = DeferredQueue::bounded(DeferredKind::Activate, 4);
        for rid in [3, 1, 2] {
            queue.push(DeferredEntry::new(rid, 1)).unwrap();
        }
        let drained: Vec<Rid> = std::iter::from_fn(|| queue.try_pop())
            .map(|entry| entry.rid)
            .collect();
        assert_eq!(drained, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }
}
