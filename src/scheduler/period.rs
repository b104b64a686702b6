/*!
 * Period Protocol
 *
 * Job arrivals driven by the period timer, and the client side of a period
 * boundary: wait for the next period, soft end-of-period, and wait for the
 * next release. Leaving critical mode replays reserves evicted by it.
 */

use super::{SchedulerCore, WaitOutcome};
use crate::core::types::{Rid, SchedResult, Ticks};
use crate::host::TaskHandle;
use crate::monitoring::OverheadKind;
use crate::timers::TimerKind;
use crate::trace::TraceEvent;
use tracing::{debug, info, warn};

impl SchedulerCore {
    /// A new job of `rid` arrives
    pub(crate) fn start_of_period(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        let entered = self.now();

        {
            let r = &mut self.table[rid];
            r.current_job_activation = now;
            r.hyp_observed = 0;
            r.hyp_preemption = 0;
        }

        if self.table[rid].job_completed {
            let r = &mut self.table[rid];
            r.current_deadline = now.saturating_add(r.hyp_enforcer_instant.ticks);
            r.job_completed = false;
            if let (true, Some(handle)) = (r.hypertask_active, r.hyptask_handle) {
                let result = self.host.hypervisor.guest_job_start(handle);
                self.host_call("guest job start", rid, result);
                self.record_overhead(OverheadKind::Hypercall, entered);
            }
        }

        let Some(task) = self.lookup_task(rid) else {
            warn!(rid, "task gone at period start, deleting reserve");
            return self.delete_inner(rid);
        };

        self.table[rid].pending_starts += 1;
        if self.table[rid].pending_starts > 1 {
            warn!(rid, "previous job still pending at period start");
            self.cancel_timer(rid, TimerKind::Enforcement);
            self.budget_enforcement(rid, false, now)?;
            self.stop(rid, now)?;
            self.table[rid].pending_starts -= 1;
        }

        if self.table[rid].in_critical_mode {
            self.leave_critical_mode(rid, now)?;
        }
        self.table[rid].reset_exectime_counters();
        if self.ready.head() == Some(rid) {
            // Still dispatched from the previous job: restart its window
            self.table[rid].start_ticks = now;
            self.start_enforcement_timer(rid, now);
        }

        if self.table[rid].has_zs_enforcement {
            self.cancel_timer(rid, TimerKind::ZeroSlack);
            self.arm_timer(rid, TimerKind::ZeroSlack, now);
        }

        self.table[rid].job_activation_count += 1;

        if self.table[rid].criticality < self.system_criticality {
            self.table[rid].blocked_arrivals += 1;
            debug!(
                rid,
                system = self.system_criticality,
                "arrival blocked by system criticality"
            );
            self.record_overhead(OverheadKind::BlockedArrival, entered);
            return Ok(());
        }

        self.table[rid].enforced = false;

        if self.table[rid].non_periodic_wait {
            if self.table[rid].waiting_release {
                self.table[rid].waiting_release = false;
                self.trace_event(now, TraceEvent::StartPeriodNonPeriodicWaitWakeup, rid);
                self.release_task(rid, &task);
                self.start(rid, now)?;
            } else {
                // Remembered for the next release wait
                self.trace_event(now, TraceEvent::StartPeriodNonPeriodicWaitNoWakeup, rid);
                self.table[rid].release.open();
            }
        } else {
            self.trace_event(now, TraceEvent::StartPeriodPeriodicWait, rid);
            self.release_task(rid, &task);
            self.start(rid, now)?;
        }

        let kind = if self.ready.head() == Some(rid) {
            OverheadKind::ContextSwitch
        } else {
            OverheadKind::Arrival
        };
        self.record_overhead(kind, entered);
        Ok(())
    }

    /// Job finished; block until the next period unless `nowait`
    ///
    /// `disable_hyp` also disables the reserve's co-task until the next
    /// guest job starts.
    pub(crate) fn wait_for_next_period(
        &mut self,
        rid: Rid,
        nowait: bool,
        disable_hyp: bool,
        now: Ticks,
    ) -> SchedResult<WaitOutcome> {
        let entered = self.now();

        self.table[rid].job_completed = true;
        self.trace_event(now, TraceEvent::Wfnp, rid);

        if disable_hyp {
            if let (true, Some(handle)) = (
                self.table[rid].hypertask_active,
                self.table[rid].hyptask_handle,
            ) {
                let result = self.host.hypervisor.disable(handle);
                self.host_call("co-task disable", rid, result);
            }
        }

        self.cancel_timer(rid, TimerKind::ZeroSlack);
        self.table[rid].non_periodic_wait = false;
        self.stop(rid, now)?;
        self.table[rid].num_wfnp += 1;
        self.table[rid].pending_starts = self.table[rid].pending_starts.saturating_sub(1);

        if self.table[rid].in_critical_mode {
            self.leave_critical_mode(rid, now)?;
        }
        self.record_overhead(OverheadKind::Departure, entered);

        if nowait {
            return Ok(WaitOutcome::Continue);
        }

        if self.table[rid].release.consume() {
            // Next period already began while this job was finishing
            self.table[rid].pending_starts += 1;
            self.start(rid, now)?;
            return Ok(WaitOutcome::Continue);
        }

        Ok(WaitOutcome::Sleep(self.table[rid].release.clone()))
    }

    /// Soft end of a job: account it and drop off the CPU without sleeping
    pub(crate) fn end_of_period(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        let entered = self.now();

        self.trace_event(now, TraceEvent::EndPeriod, rid);
        self.cancel_timer(rid, TimerKind::ZeroSlack);
        self.stop(rid, now)?;

        let r = &mut self.table[rid];
        r.num_wfnp += 1;
        r.non_periodic_wait = true;
        r.end_of_period_marked = true;
        r.job_completed = true;
        r.pending_starts = r.pending_starts.saturating_sub(1);

        if self.table[rid].in_critical_mode {
            self.leave_critical_mode(rid, now)?;
        }
        self.record_overhead(OverheadKind::Departure, entered);
        Ok(())
    }

    /// Block until the next release following an end-of-period
    ///
    /// Without a preceding end-of-period this is a plain wait for the next
    /// period.
    pub(crate) fn wait_for_next_release(&mut self, rid: Rid, now: Ticks) -> SchedResult<WaitOutcome> {
        if !self.table[rid].end_of_period_marked {
            return self.wait_for_next_period(rid, false, true, now);
        }

        self.table[rid].end_of_period_marked = false;
        self.trace_event(now, TraceEvent::WaitRelease, rid);

        if self.table[rid].release.consume() {
            self.trace_event(now, TraceEvent::WaitReleaseNotBlocked, rid);
            self.start(rid, now)?;
            return Ok(WaitOutcome::Continue);
        }

        self.trace_event(now, TraceEvent::WaitReleaseBlocked, rid);
        self.table[rid].waiting_release = true;
        Ok(WaitOutcome::Sleep(self.table[rid].release.clone()))
    }

    /// Drop `rid` off the criticality stack and replay reserves it evicted
    pub(crate) fn leave_critical_mode(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        self.table[rid].in_critical_mode = false;
        self.crit_stack.remove(&mut self.table, rid)?;
        self.system_criticality = self.crit_stack.system_criticality(&self.table);

        let overloaded = self.table[rid].exceeded_nominal();
        let (replayed, dropped) = self.release_blocked(overloaded, now)?;

        info!(
            rid,
            system = self.system_criticality,
            replayed,
            dropped,
            "Leaving critical mode"
        );
        Ok(())
    }

    /// Pop every blocked reserve at or above the system criticality
    ///
    /// They are resumed unless the critical job overran its nominal budget,
    /// in which case they wait for their next period.
    pub(crate) fn release_blocked(
        &mut self,
        overloaded: bool,
        now: Ticks,
    ) -> SchedResult<(usize, usize)> {
        let mut replayed = 0usize;
        let mut dropped = 0usize;

        while let Some(blocked) = self
            .crit_blocked
            .pop_at_or_above(&mut self.table, self.system_criticality)?
        {
            if overloaded {
                dropped += 1;
                continue;
            }
            self.replay_evicted(blocked, now)?;
            replayed += 1;
        }
        Ok((replayed, dropped))
    }

    /// Resume a reserve evicted by a zero-slack enforcement
    fn replay_evicted(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        if self.table[rid].request_stop {
            // Eviction still queued for the worker: cancel it in place
            self.table[rid].request_stop = false;
            return Ok(());
        }
        if self.ready.contains(&self.table, rid)? {
            return Ok(());
        }

        let Some(task) = self.lookup_task(rid) else {
            warn!(rid, "evicted task gone, deleting reserve");
            return self.delete_inner(rid);
        };

        let r = &mut self.table[rid];
        r.enforced = false;
        r.pending_starts += 1;
        let woken = self.host.tasks.wake(&task);
        self.host_call("wake", rid, woken);
        self.start(rid, now)
    }

    /// Wake a task blocked at a period boundary
    pub(crate) fn release_task(&mut self, rid: Rid, task: &TaskHandle) {
        let woken = self.host.tasks.wake(task);
        self.host_call("wake", rid, woken);
        self.table[rid].release.open();
    }
}
