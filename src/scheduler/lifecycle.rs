/*!
 * Reserve Lifecycle
 * Create, attach, delete, and the client-facing operations on a reserve
 */

use super::{AttachOutcome, SchedulerCore, WaitOutcome};
use crate::admission;
use crate::core::config::AdmissionMode;
use crate::core::errors::SchedulerError;
use crate::core::limits::NORMAL_PRIORITY;
use crate::core::types::{Nanos, Owner, Pid, Rid, SchedResult, SignalNumber, Ticks};
use crate::deferred::DeferredKind;
use crate::host::TaskHandle;
use crate::monitoring::OverheadKind;
use crate::reserve::{ReserveSpec, SignalRegistration};
use crate::timers::TimerKind;
use crate::trace::{TraceEvent, TraceRecord};
use tracing::{debug, info, warn};

impl SchedulerCore {
    // ---- client operations ----

    /// Admit and allocate a reserve
    pub fn create_reserve(&mut self, spec: &ReserveSpec) -> SchedResult<Rid> {
        self.ensure_healthy()?;
        let result = self.create_inner(spec);
        self.settle(result)
    }

    /// Bind task `pid` to reserve `rid` and start its first period
    pub fn attach_reserve(&mut self, rid: Rid, pid: Pid) -> SchedResult<AttachOutcome> {
        self.ensure_healthy()?;
        let now = self.now();
        let result = self.attach_inner(rid, pid, now);
        self.settle(result)
    }

    /// Tear a reserve down; deleting a free slot fails with `InactiveReserve`
    pub fn delete_reserve(&mut self, rid: Rid) -> SchedResult<()> {
        self.ensure_healthy()?;
        let result = self.delete_inner(rid);
        self.settle(result)
    }

    pub fn wait_period(&mut self, rid: Rid) -> SchedResult<WaitOutcome> {
        self.ensure_healthy()?;
        self.ensure_attached(rid)?;
        let now = self.now();
        let result = self.wait_for_next_period(rid, false, true, now);
        self.settle(result)
    }

    /// Complete the job without blocking
    pub fn nowait_period(&mut self, rid: Rid) -> SchedResult<()> {
        self.ensure_healthy()?;
        self.ensure_attached(rid)?;
        let now = self.now();
        let result = self.wait_for_next_period(rid, true, true, now).map(|_| ());
        self.settle(result)
    }

    pub fn end_period(&mut self, rid: Rid) -> SchedResult<()> {
        self.ensure_healthy()?;
        self.ensure_attached(rid)?;
        let now = self.now();
        let result = self.end_of_period(rid, now);
        self.settle(result)
    }

    pub fn wait_release(&mut self, rid: Rid) -> SchedResult<WaitOutcome> {
        self.ensure_healthy()?;
        self.ensure_attached(rid)?;
        let now = self.now();
        let result = self.wait_for_next_release(rid, now);
        self.settle(result)
    }

    /// Register (or with a negative `pid`, unregister) a cooperative
    /// enforcement handler
    pub fn capture_enforcement_signal(
        &mut self,
        rid: Rid,
        pid: Pid,
        signo: SignalNumber,
    ) -> SchedResult<()> {
        self.ensure_healthy()?;
        self.table.active(rid)?;

        if pid < 0 {
            self.table[rid].enforcement_signal = None;
            debug!(rid, "enforcement handler unregistered");
            return Ok(());
        }
        if pid == 0 || signo <= 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "invalid handler pid {} / signal {}",
                pid, signo
            )));
        }
        self.table[rid].enforcement_signal = Some(SignalRegistration { pid, signo });
        debug!(rid, pid, signo, "enforcement handler registered");
        Ok(())
    }

    /// Worst observed job execution time
    pub fn wcet_ns(&self, rid: Rid) -> SchedResult<Nanos> {
        let r = self.table.active(rid)?;
        Ok(self.calibration().ticks_to_ns(r.worst_exectime))
    }

    /// Average observed job execution time
    pub fn acet_ns(&self, rid: Rid) -> SchedResult<Nanos> {
        let r = self.table.active(rid)?;
        Ok(self.calibration().ticks_to_ns(r.average_exectime()))
    }

    pub fn num_enforcements(&self, rid: Rid) -> SchedResult<u64> {
        Ok(self.table.active(rid)?.num_enforcements)
    }

    /// Records available, including the not-yet-merged hypervisor log
    pub fn trace_len(&mut self) -> usize {
        self.merge_hypervisor_log();
        self.trace.len()
    }

    /// Drain the trace ring, oldest first
    pub fn read_trace(&mut self) -> Vec<TraceRecord> {
        self.merge_hypervisor_log();
        self.trace.drain()
    }

    // ---- internals ----

    fn ensure_attached(&self, rid: Rid) -> SchedResult<()> {
        if self.table.active(rid)?.attached {
            Ok(())
        } else {
            Err(SchedulerError::NotAttached(rid))
        }
    }

    fn create_inner(&mut self, spec: &ReserveSpec) -> SchedResult<Rid> {
        spec.validate()?;
        let rid = self.table.allocate().ok_or(SchedulerError::NoFreeReserve)?;
        let calibration = self.calibration();

        {
            let r = &mut self.table[rid];
            r.period = calibration.span(spec.period_ns);
            r.exectime = calibration.span(spec.exec_ns);
            r.nominal_exectime = calibration.span(spec.nominal_exec_ns);
            r.priority = spec.priority;
            r.criticality = spec.criticality;
            r.has_zs_enforcement = spec.has_zero_slack();
            r.zsinstant = if r.has_zs_enforcement {
                calibration.span(spec.zs_instant_ns)
            } else {
                r.period.doubled()
            };
            if let Some(instant) = spec.hyp_enforcer_instant_ns {
                r.has_hyptask = true;
                r.hyp_enforcer_instant = calibration.span(instant);
            }
        }

        let verdict = admission::admit(&self.table, rid);
        if !verdict.admitted {
            match self.config.admission {
                AdmissionMode::Enforce => {
                    self.table.free(rid);
                    warn!(
                        rid,
                        response_ns = verdict.response_ns,
                        period_ns = spec.period_ns,
                        "Reserve rejected by admission control"
                    );
                    return Err(SchedulerError::AdmissionRejected {
                        rid,
                        response_ns: verdict.response_ns,
                        period_ns: spec.period_ns,
                    });
                }
                AdmissionMode::Advisory => warn!(
                    rid,
                    response_ns = verdict.response_ns,
                    period_ns = spec.period_ns,
                    "Reserve not schedulable, admitted in advisory mode"
                ),
            }
        }

        let r = &mut self.table[rid];
        if r.has_zs_enforcement && verdict.admitted {
            // Never later than the analysed instant
            let instant = calibration.span(verdict.zero_slack_ns.min(spec.zs_instant_ns));
            r.zsinstant = if instant.ticks == r.period.ticks {
                instant.doubled()
            } else {
                instant
            };
        }
        let (period, zsinstant) = (r.period, r.zsinstant);
        r.timers.period.set_expiration(period);
        r.timers.zero_slack.set_expiration(zsinstant);

        self.rm.insert(&mut self.table, rid)?;
        self.calculate_rm_priorities()?;

        info!(
            rid,
            period_ns = spec.period_ns,
            exec_ns = spec.exec_ns,
            criticality = spec.criticality,
            response_ns = verdict.response_ns,
            zero_slack_ns = zsinstant.ns,
            "Reserve created"
        );
        Ok(rid)
    }

    fn attach_inner(&mut self, rid: Rid, pid: Pid, now: Ticks) -> SchedResult<AttachOutcome> {
        let r = self.table.active(rid)?;
        if r.attached || r.timers.start.is_armed() {
            return Err(SchedulerError::AlreadyAttached(rid));
        }
        if pid <= 0 {
            return Err(SchedulerError::InvalidArgument(format!("invalid pid {}", pid)));
        }
        let task = self
            .host
            .tasks
            .lookup(pid)
            .ok_or(SchedulerError::TaskNotFound(pid))?;

        self.table[rid].owner = Owner::Task(pid);

        if self.config.secure_bootstrap {
            let start = self.calculate_start_time(rid, now);
            self.arm_timer_at(rid, TimerKind::Start, start);
            info!(rid, pid, start, "Reserve attach deferred to start instant");
            return Ok(AttachOutcome::Deferred(self.table[rid].release.clone()));
        }

        self.complete_attach(rid, &task, now)?;
        Ok(AttachOutcome::Running)
    }

    /// First period of a freshly attached reserve
    pub(crate) fn complete_attach(
        &mut self,
        rid: Rid,
        task: &TaskHandle,
        now: Ticks,
    ) -> SchedResult<()> {
        {
            let r = &mut self.table[rid];
            r.pending_starts = 1;
            r.enforced = false;
            r.request_stop = false;
            r.enforcement_pending = false;
            r.in_critical_mode = false;
            r.bound_to_cpu = false;
            r.current_exectime = 0;
            r.worst_exectime = 0;
            r.avg_exectime_sum = 0;
            r.avg_samples = 0;
            r.job_activation_count = 0;
            r.attached = true;
        }

        self.calculate_rm_priorities()?;
        self.set_rm_priorities();

        self.arm_timer(rid, TimerKind::Period, now);
        if self.table[rid].has_zs_enforcement {
            self.arm_timer(rid, TimerKind::ZeroSlack, now);
        }
        self.trace_event(now, TraceEvent::StartPeriod, rid);

        if self.config.secure_bootstrap {
            // The hypervisor created the co-task itself
            self.table[rid].hypertask_active = self.table[rid].has_hyptask;
        } else {
            self.create_hypertask(rid);
        }

        {
            let r = &mut self.table[rid];
            r.first_activation = now;
            r.current_job_activation = now;
            r.hyp_observed = 0;
            r.hyp_preemption = 0;
            r.job_activation_count = 1;
            r.current_deadline = now.saturating_add(r.hyp_enforcer_instant.ticks);
            r.job_completed = true;
        }

        self.start(rid, now)?;
        info!(rid, pid = task.pid, priority = self.table[rid].priority, "Reserve attached");
        Ok(())
    }

    pub(crate) fn delete_inner(&mut self, rid: Rid) -> SchedResult<()> {
        self.table.active(rid)?;
        let now = self.now();
        let task = self.lookup_task(rid);

        if self.ready.contains(&self.table, rid)? {
            match task {
                Some(_) => self.stop(rid, now)?,
                None => self.unlink_departed(rid, now)?,
            }
        }

        self.cancel_all_timers(rid);
        self.crit_blocked.remove(&mut self.table, rid)?;
        if self.crit_stack.remove(&mut self.table, rid)? {
            self.system_criticality = self.crit_stack.system_criticality(&self.table);
            self.release_blocked(false, now)?;
        }
        self.table[rid].in_critical_mode = false;

        if let (true, Some(handle)) = (
            self.table[rid].hypertask_active,
            self.table[rid].hyptask_handle,
        ) {
            let result = self.host.hypervisor.delete(handle);
            self.host_call("co-task delete", rid, result);
        }
        self.table[rid].hypertask_active = false;
        self.table[rid].hyptask_handle = None;

        if let Some(task) = task {
            let result = self.host.tasks.set_priority(&task, NORMAL_PRIORITY);
            self.host_call("priority restore", rid, result);
        }

        self.rm.remove(&mut self.table, rid)?;
        self.table.free(rid);
        info!(rid, "Reserve deleted");
        Ok(())
    }

    /// Rate-monotonic priorities over every reserve
    pub(crate) fn calculate_rm_priorities(&mut self) -> SchedResult<()> {
        let assignment = self.rm.assign_priorities(&mut self.table)?;
        debug!(
            top = assignment.top,
            reserves = assignment.assigned.len(),
            "rate-monotonic priorities assigned"
        );
        Ok(())
    }

    /// Queue every attached reserve for priority activation
    pub(crate) fn set_rm_priorities(&mut self) {
        let order = match self.rm.to_vec(&self.table) {
            Ok(order) => order,
            Err(e) => {
                warn!("Priority activation skipped: {}", e);
                return;
            }
        };
        for rid in order {
            if self.table[rid].attached {
                self.defer(DeferredKind::Activate, rid);
            }
        }
    }

    fn create_hypertask(&mut self, rid: Rid) {
        let r = &self.table[rid];
        if !r.has_hyptask || r.hypertask_active {
            return;
        }
        let entered = self.now();

        match self
            .host
            .hypervisor
            .create(r.hyp_enforcer_instant, r.period, r.priority, rid)
        {
            Ok(handle) => {
                self.table[rid].hyptask_handle = Some(handle);
                self.table[rid].hypertask_active = true;
                let result = self.host.hypervisor.guest_job_start(handle);
                self.host_call("guest job start", rid, result);
                debug!(rid, handle = handle.0, "co-task created");
            }
            Err(e) => warn!(rid, "Co-task creation failed, running without backstop: {}", e),
        }
        self.record_overhead(OverheadKind::Hypercall, entered);
    }
}
