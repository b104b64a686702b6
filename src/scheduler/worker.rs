/*!
 * Deferred Work Handlers
 * What the reschedule and activate workers do with each queued reserve
 */

use super::SchedulerCore;
use crate::core::types::{Rid, SchedResult};
use crate::deferred::{DeferredEntry, DeferredKind};
use tracing::{debug, warn};

impl SchedulerCore {
    /// Reschedule entry: suspend an enforced reserve, or restart one
    pub fn process_reschedule(&mut self, entry: DeferredEntry) -> SchedResult<()> {
        self.ensure_healthy()?;
        if !self.is_current(DeferredKind::Reschedule, entry) {
            return Ok(());
        }
        let result = self.reschedule_inner(entry.rid);
        self.settle(result)
    }

    /// Activate entry: pin to the worker core once, then apply the priority
    pub fn process_activation(&mut self, entry: DeferredEntry) -> SchedResult<()> {
        self.ensure_healthy()?;
        if !self.is_current(DeferredKind::Activate, entry) {
            return Ok(());
        }
        let result = self.activation_inner(entry.rid);
        self.settle(result)
    }

    /// Entry still refers to the reserve it was queued for
    fn is_current(&self, kind: DeferredKind, entry: DeferredEntry) -> bool {
        match self.reserve(entry.rid) {
            Some(r) if r.incarnation == entry.incarnation => true,
            Some(_) => {
                debug!(rid = entry.rid, "{} entry for a reused slot dropped", kind);
                false
            }
            None => {
                debug!(rid = entry.rid, "{} entry for deleted reserve", kind);
                false
            }
        }
    }

    /// Drain both deferred queues synchronously
    ///
    /// Returns the number of entries processed. Used by the simulation and
    /// by hosts without worker tasks.
    pub fn drain_deferred(&mut self) -> SchedResult<usize> {
        let mut processed = 0;
        loop {
            if let Some(entry) = self.reschedule.try_pop() {
                self.process_reschedule(entry)?;
            } else if let Some(entry) = self.activate.try_pop() {
                self.process_activation(entry)?;
            } else {
                return Ok(processed);
            }
            processed += 1;
        }
    }

    fn reschedule_inner(&mut self, rid: Rid) -> SchedResult<()> {
        let now = self.now();

        if self.table[rid].request_stop {
            self.table[rid].request_stop = false;
            if self.table[rid].enforced {
                warn!(rid, "reserve already enforced");
                return Ok(());
            }
            self.table[rid].enforced = true;

            let Some(task) = self.lookup_task(rid) else {
                return self.delete_inner(rid);
            };
            let result = self.host.tasks.request_suspend(&task);
            self.host_call("suspend", rid, result);
            let r = &mut self.table[rid];
            r.pending_starts = r.pending_starts.saturating_sub(1);
            return self.stop(rid, now);
        }

        let Some(task) = self.lookup_task(rid) else {
            return self.delete_inner(rid);
        };
        if !self.table[rid].attached {
            return Ok(());
        }
        let woken = self.host.tasks.wake(&task);
        self.host_call("wake", rid, woken);
        let result = self.host.tasks.set_priority(&task, self.table[rid].priority);
        self.host_call("set priority", rid, result);
        self.start(rid, now)
    }

    fn activation_inner(&mut self, rid: Rid) -> SchedResult<()> {
        let priority = self.table[rid].priority;
        let Some(task) = self.lookup_task(rid) else {
            warn!(rid, "task gone before activation, deleting reserve");
            return self.delete_inner(rid);
        };

        if !self.table[rid].bound_to_cpu {
            let core = self.config.worker_core;
            match self.host.tasks.bind_to_core(&task, core) {
                Ok(()) => self.table[rid].bound_to_cpu = true,
                Err(e) => warn!(rid, core, "Core binding failed: {}", e),
            }
        }
        let result = self.host.tasks.set_priority(&task, priority);
        self.host_call("set priority", rid, result);
        Ok(())
    }
}
