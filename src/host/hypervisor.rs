/*!
 * Hypervisor Backends
 * A null backend for hosts without a hypervisor, and an in-memory one that
 * keeps a preemption log the way the real hypervisor does
 */

use super::{HypEvent, HypLogEntry, Hypervisor, HyptaskHandle};
use crate::core::errors::HostError;
use crate::core::types::{Priority, Rid, Ticks, TimeSpan};
use crate::time::TimeSource;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Host without a hypervisor: co-task creation fails, the log is empty
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHypervisor;

impl Hypervisor for NoHypervisor {
    fn create(
        &self,
        _first_offset: TimeSpan,
        _period: TimeSpan,
        _priority: Priority,
        _id: Rid,
    ) -> Result<HyptaskHandle, HostError> {
        Err(HostError::Unsupported("hypervisor co-tasks".into()))
    }

    fn guest_job_start(&self, _handle: HyptaskHandle) -> Result<(), HostError> {
        Err(HostError::Unsupported("hypervisor co-tasks".into()))
    }

    fn enable(&self, _handle: HyptaskHandle) -> Result<(), HostError> {
        Err(HostError::Unsupported("hypervisor co-tasks".into()))
    }

    fn disable(&self, _handle: HyptaskHandle) -> Result<(), HostError> {
        Err(HostError::Unsupported("hypervisor co-tasks".into()))
    }

    fn delete(&self, _handle: HyptaskHandle) -> Result<(), HostError> {
        Err(HostError::Unsupported("hypervisor co-tasks".into()))
    }

    fn dump_log(&self) -> Vec<HypLogEntry> {
        Vec::new()
    }
}

/// State of one simulated co-task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedHyptask {
    pub id: Rid,
    pub first_offset: TimeSpan,
    pub period: TimeSpan,
    pub priority: Priority,
    pub enabled: bool,
    pub guest_jobs: u64,
}

/// In-memory hypervisor keeping a preemption log
#[derive(Debug)]
pub struct SimulatedHypervisor {
    clock: Arc<dyn TimeSource>,
    next_handle: AtomicU32,
    tasks: DashMap<HyptaskHandle, SimulatedHyptask, RandomState>,
    log: Mutex<Vec<HypLogEntry>>,
}

impl SimulatedHypervisor {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            next_handle: AtomicU32::new(1),
            tasks: DashMap::with_hasher(RandomState::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Record that co-task `id` ran (preempting the guest) over `[before, after)`
    pub fn record_execution(&self, id: Rid, before: Ticks, after: Ticks) {
        let mut log = self.log.lock();
        log.push(HypLogEntry {
            timestamp: before,
            event: HypEvent::ExecBefore,
            id,
        });
        log.push(HypLogEntry {
            timestamp: after,
            event: HypEvent::ExecAfter,
            id,
        });
    }

    pub fn task(&self, handle: HyptaskHandle) -> Option<SimulatedHyptask> {
        self.tasks.get(&handle).map(|t| t.value().clone())
    }

    /// Co-task created for reserve `id`, if any
    pub fn task_for(&self, id: Rid) -> Option<(HyptaskHandle, SimulatedHyptask)> {
        self.tasks
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| (*entry.key(), entry.value().clone()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn with_task<F>(&self, op: &str, handle: HyptaskHandle, f: F) -> Result<(), HostError>
    where
        F: FnOnce(&mut SimulatedHyptask),
    {
        match self.tasks.get_mut(&handle) {
            Some(mut task) => {
                f(task.value_mut());
                Ok(())
            }
            None => Err(HostError::HypercallFailed {
                op: op.into(),
                code: -1,
            }),
        }
    }
}

impl Hypervisor for SimulatedHypervisor {
    fn create(
        &self,
        first_offset: TimeSpan,
        period: TimeSpan,
        priority: Priority,
        id: Rid,
    ) -> Result<HyptaskHandle, HostError> {
        let before = self.clock.now();
        let handle = HyptaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.tasks.insert(
            handle,
            SimulatedHyptask {
                id,
                first_offset,
                period,
                priority,
                enabled: true,
                guest_jobs: 0,
            },
        );

        let mut log = self.log.lock();
        log.push(HypLogEntry {
            timestamp: before,
            event: HypEvent::CreateBefore,
            id,
        });
        log.push(HypLogEntry {
            timestamp: self.clock.now(),
            event: HypEvent::CreateAfter,
            id,
        });
        Ok(handle)
    }

    fn guest_job_start(&self, handle: HyptaskHandle) -> Result<(), HostError> {
        self.with_task("guest_job_start", handle, |t| t.guest_jobs += 1)
    }

    fn enable(&self, handle: HyptaskHandle) -> Result<(), HostError> {
        self.with_task("enable", handle, |t| t.enabled = true)
    }

    fn disable(&self, handle: HyptaskHandle) -> Result<(), HostError> {
        self.with_task("disable", handle, |t| t.enabled = false)
    }

    fn delete(&self, handle: HyptaskHandle) -> Result<(), HostError> {
        self.tasks
            .remove(&handle)
            .map(|_| ())
            .ok_or(HostError::HypercallFailed {
                op: "delete".into(),
                code: -1,
            })
    }

    fn dump_log(&self) -> Vec<HypLogEntry> {
        std::mem::take(&mut *self.log.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_create_logs_and_drains() {
        let clock = Arc::new(ManualClock::new());
        clock.advance(500);
        let hyp = SimulatedHypervisor::new(clock.clone());

        let handle = hyp
            .create(TimeSpan::from_parts(80, 80), TimeSpan::from_parts(100, 100), 60, 4)
            .unwrap();
        hyp.guest_job_start(handle).unwrap();
        hyp.disable(handle).unwrap();

        let task = hyp.task(handle).unwrap();
        assert_eq!(task.guest_jobs, 1);
        assert!(!task.enabled);

        let log = hyp.dump_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].event, HypEvent::CreateBefore);
        assert_eq!(log[0].timestamp, 500);
        assert!(hyp.dump_log().is_empty());
    }

    #[test]
    fn test_unknown_handle_fails() {
        let hyp = SimulatedHypervisor::new(Arc::new(ManualClock::new()));
        assert!(hyp.enable(HyptaskHandle(99)).is_err());
        assert!(hyp.delete(HyptaskHandle(99)).is_err());
        assert!(NoHypervisor.dump_log().is_empty());
    }
}
