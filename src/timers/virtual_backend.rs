/*!
 * Virtual Timers
 * Deterministic backend: armed timers sit in a deadline-ordered set until
 * the caller pops them
 */

use super::{TimerBackend, TimerKey};
use crate::core::types::Ticks;
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Deadline-ordered pending set; ties fire in arming order
#[derive(Debug, Default)]
pub struct VirtualTimers {
    pending: Mutex<BTreeSet<(Ticks, u64, TimerKey)>>,
    sequence: Mutex<u64>,
}

impl VirtualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.pending.lock().iter().next().map(|(deadline, _, _)| *deadline)
    }

    /// Remove and return the earliest pending firing
    pub fn pop_next(&self) -> Option<(Ticks, TimerKey)> {
        let mut pending = self.pending.lock();
        let first = *pending.iter().next()?;
        pending.remove(&first);
        Some((first.0, first.2))
    }

    /// Remove and return every firing due at or before `now`
    pub fn pop_due(&self, now: Ticks) -> Vec<TimerKey> {
        let mut pending = self.pending.lock();
        let mut due = Vec::new();
        while let Some(first) = pending.iter().next().copied() {
            if first.0 > now {
                break;
            }
            pending.remove(&first);
            due.push(first.2);
        }
        due
    }

    pub fn is_scheduled(&self, key: &TimerKey) -> bool {
        self.pending.lock().iter().any(|(_, _, k)| k == key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl TimerBackend for VirtualTimers {
    fn schedule(&self, key: TimerKey, deadline: Ticks) {
        let seq = {
            let mut sequence = self.sequence.lock();
            *sequence += 1;
            *sequence
        };
        self.pending.lock().insert((deadline, seq, key));
    }

    fn cancel(&self, key: TimerKey) {
        self.pending.lock().retain(|(_, _, k)| *k != key);
    }
}
