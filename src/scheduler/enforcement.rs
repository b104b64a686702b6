/*!
 * Enforcement
 *
 * Budget enforcement (a reserve exhausted its execution budget) and
 * zero-slack enforcement (a reserve reached its zero-slack instant and
 * raises the system criticality). Hypervisor co-task execution observed in
 * the merged preemption log is credited back to the guest before a budget
 * is declared exhausted.
 */

use super::types::HypAnchor;
use super::SchedulerCore;
use crate::core::limits::MAX_START_TIME_STEPS;
use crate::core::types::{Rid, SchedResult, Ticks};
use crate::deferred::DeferredKind;
use crate::host::{EnforcementNotice, HypEvent};
use crate::monitoring::OverheadKind;
use crate::timers::TimerKind;
use crate::trace::TraceEvent;
use tracing::{debug, info, warn};

impl SchedulerCore {
    /// Enforce the budget of `rid`
    ///
    /// With a registered handler the task is notified and left running;
    /// otherwise, when `request_stop` is set, the reserve is queued for the
    /// reschedule worker to suspend.
    pub(crate) fn budget_enforcement(
        &mut self,
        rid: Rid,
        request_stop: bool,
        now: Ticks,
    ) -> SchedResult<()> {
        let entered = self.now();
        let is_head = self.ready.head() == Some(rid);
        if is_head {
            self.fold_elapsed(rid, now)?;
        }

        self.merge_hypervisor_log();
        let preemption = self.table[rid].hyp_observed;
        let credited = self.table[rid].hyp_preemption;

        if preemption > credited {
            let fresh = preemption - credited;
            let r = &mut self.table[rid];
            r.hyp_preemption = preemption;
            r.current_exectime = r.current_exectime.saturating_sub(fresh);

            if is_head && self.start_enforcement_timer(rid, now) {
                debug!(rid, credit = fresh, "hypervisor preemption credited, enforcement deferred");
                return Ok(());
            }
        }

        self.trace_event(now, TraceEvent::BudgetEnforcement, rid);
        self.cancel_timer(rid, TimerKind::ZeroSlack);

        let r = &mut self.table[rid];
        r.num_enforcements += 1;
        r.enforcement_pending = true;
        let periodic = !r.end_of_period_marked;
        let handler = r.enforcement_signal;

        match handler {
            Some(registration) => {
                let notice = EnforcementNotice {
                    rid,
                    stop: request_stop,
                    periodic,
                };
                let delivered =
                    self.host
                        .notices
                        .deliver(registration.pid, registration.signo, notice);
                self.host_call("enforcement notice", rid, delivered);
                if !request_stop {
                    self.trace_event(now, TraceEvent::DontWfnp, rid);
                }
            }
            None if request_stop => {
                self.table[rid].request_stop = true;
                self.defer(DeferredKind::Reschedule, rid);
            }
            None => {}
        }

        self.record_overhead(OverheadKind::Enforcement, entered);
        Ok(())
    }

    /// Zero-slack instant of `rid` reached: raise the system criticality and
    /// evict every ready reserve below it
    pub(crate) fn zs_enforcement(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        let entered = self.now();
        let r = &self.table[rid];
        if r.enforced || r.criticality < self.system_criticality {
            debug!(
                rid,
                criticality = r.criticality,
                system = self.system_criticality,
                "zero-slack instant ignored"
            );
            return Ok(());
        }

        self.table[rid].in_critical_mode = true;
        self.crit_stack.push(&mut self.table, rid)?;
        self.system_criticality = self.crit_stack.system_criticality(&self.table);

        let floor = self.system_criticality;
        let victims: Vec<Rid> = self
            .ready
            .to_vec(&self.table)?
            .into_iter()
            .filter(|v| self.table[*v].criticality < floor)
            .collect();

        for &victim in &victims {
            self.table[victim].request_stop = true;
            self.defer(DeferredKind::Reschedule, victim);
            self.crit_blocked.push(&mut self.table, victim)?;
        }

        info!(
            rid,
            criticality = floor,
            evicted = victims.len(),
            at = now,
            "Entering critical mode"
        );
        self.record_overhead(OverheadKind::ZeroSlackEnforcement, entered);
        Ok(())
    }

    /// Move the hypervisor preemption log into the trace ring
    ///
    /// Each closed exec-before/exec-after pair is credited to every other
    /// reserve's current job window; the latest creation or job start of
    /// each co-task is kept as its bootstrap anchor.
    pub(crate) fn merge_hypervisor_log(&mut self) {
        let entries = self.host.hypervisor.dump_log();
        if entries.is_empty() {
            return;
        }
        let calibration = self.calibration();
        for entry in entries {
            match entry.event {
                HypEvent::CreateBefore => {
                    self.hyp_log.anchors.insert(
                        entry.id,
                        HypAnchor {
                            event: entry.event,
                            at: entry.timestamp,
                        },
                    );
                }
                HypEvent::ExecBefore => {
                    self.hyp_log.anchors.insert(
                        entry.id,
                        HypAnchor {
                            event: entry.event,
                            at: entry.timestamp,
                        },
                    );
                    self.hyp_log.open.insert(entry.id, entry.timestamp);
                }
                HypEvent::ExecAfter => {
                    if let Some(begin) = self.hyp_log.open.remove(&entry.id) {
                        self.credit_preemption(entry.id, begin, entry.timestamp);
                    }
                }
                HypEvent::CreateAfter => {}
            }
            self.trace.record(
                calibration.ticks_to_ns(entry.timestamp),
                TraceEvent::from(entry.event),
                entry.id,
            );
        }
    }

    /// Co-task `preemptor` ran over `[begin, end)`; clip to each other
    /// reserve's job window and add it to that reserve's observed preemption
    fn credit_preemption(&mut self, preemptor: Rid, begin: Ticks, end: Ticks) {
        for rid in 0..self.table.capacity() {
            let r = &mut self.table[rid];
            if rid == preemptor || !r.is_active() {
                continue;
            }
            let from = begin.max(r.current_job_activation);
            if end > from {
                r.hyp_observed = r.hyp_observed.saturating_add(end - from);
            }
        }
    }

    /// First release instant for a securely bootstrapped reserve
    ///
    /// Anchored on the co-task's last logged creation (one period later) or
    /// job start (one period minus the enforcer instant later), then advanced
    /// by whole periods until it lies in the future. Without a log record the
    /// reserve starts immediately.
    pub(crate) fn calculate_start_time(&mut self, rid: Rid, now: Ticks) -> Ticks {
        self.merge_hypervisor_log();
        let period = self.table[rid].period.ticks;
        let enforcer = self.table[rid].hyp_enforcer_instant.ticks;

        let Some(anchor) = self.hyp_log.anchors.get(&rid).copied() else {
            debug!(rid, "no co-task record, starting immediately");
            return now;
        };

        let mut start = match anchor.event {
            HypEvent::CreateBefore => anchor.at.saturating_add(period),
            _ => anchor.at.saturating_add(period.saturating_sub(enforcer)),
        };

        let mut steps = 0;
        while start <= now && steps < MAX_START_TIME_STEPS {
            start = start.saturating_add(period);
            steps += 1;
        }
        if start <= now {
            warn!(rid, steps, "start time still in the past, starting immediately");
            return now;
        }
        start
    }
}
