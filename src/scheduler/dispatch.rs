/*!
 * Dispatch
 * Ready-queue start/stop with per-job execution accounting
 */

use super::SchedulerCore;
use crate::core::errors::SchedulerError;
use crate::core::types::{Rid, SchedResult, Ticks};
use crate::monitoring::OverheadKind;
use crate::queues::Insertion;
use crate::timers::TimerKind;
use crate::trace::TraceEvent;
use tracing::{debug, warn};

impl SchedulerCore {
    /// Make `rid` runnable
    ///
    /// The current head is charged for its time so far; if `rid` becomes the
    /// new head it is dispatched with an enforcement timer for its remaining
    /// budget (or enforced at once when nothing is left).
    pub(crate) fn start(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        if self.ready.contains(&self.table, rid)? {
            warn!(rid, "start: reserve already in ready queue");
            return Ok(());
        }

        if let Some(head) = self.ready.head() {
            self.fold_elapsed(head, now)?;
            self.cancel_timer(head, TimerKind::Enforcement);
        }

        let insertion = self.ready.insert(&mut self.table, rid)?;
        let Some(head) = self.ready.head() else {
            return Ok(());
        };

        if let Insertion::Head { previous } = insertion {
            if let Some(previous) = previous {
                self.trace_event(now, TraceEvent::Preempted, previous);
            }
            self.trace_event(now, TraceEvent::Resumed, head);
            self.record_overhead(OverheadKind::ContextSwitch, now);
        }

        self.dispatch_head(head, now)
    }

    /// Remove `rid` from the ready queue; a departing head hands the CPU to
    /// its successor
    pub(crate) fn stop(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        if self.ready.head() == Some(rid) {
            self.trace_event(now, TraceEvent::Preempted, rid);
            self.fold_elapsed(rid, now)?;
            self.cancel_timer(rid, TimerKind::Enforcement);
            self.ready.pop(&mut self.table)?;

            if let Some(next) = self.ready.head() {
                self.trace_event(now, TraceEvent::Resumed, next);
                self.dispatch_head(next, now)?;
            }
            return Ok(());
        }

        if !self.ready.remove(&mut self.table, rid)? {
            warn!(rid, "stop: reserve not in ready queue");
        }
        Ok(())
    }

    /// Unlink a reserve whose task vanished; no accounting is charged
    pub(crate) fn unlink_departed(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        let was_head = self.ready.head() == Some(rid);
        if !self.ready.remove(&mut self.table, rid)? {
            return Ok(());
        }
        self.cancel_timer(rid, TimerKind::Enforcement);

        if was_head {
            if let Some(next) = self.ready.head() {
                if self.lookup_task(next).is_some() {
                    self.trace_event(now, TraceEvent::Resumed, next);
                    self.dispatch_head(next, now)?;
                }
            }
        }
        Ok(())
    }

    /// Restart the head's accounting window and arm its budget timer
    fn dispatch_head(&mut self, head: Rid, now: Ticks) -> SchedResult<()> {
        self.table[head].start_ticks = now;
        if self.start_enforcement_timer(head, now) {
            return Ok(());
        }

        let r = &self.table[head];
        if r.enforcement_pending || r.enforced {
            debug!(rid = head, "head already enforced, waiting for worker");
            return Ok(());
        }
        self.budget_enforcement(head, true, now)
    }

    /// Arm the enforcement timer for the remaining budget
    ///
    /// Returns false when the budget is exhausted (nothing armed).
    pub(crate) fn start_enforcement_timer(&mut self, rid: Rid, now: Ticks) -> bool {
        let remaining = self.table[rid].remaining_budget();
        if remaining == 0 {
            return false;
        }
        self.arm_timer_at(rid, TimerKind::Enforcement, now.saturating_add(remaining));
        true
    }

    /// Charge the head for the time since it was last dispatched
    pub(crate) fn fold_elapsed(&mut self, rid: Rid, now: Ticks) -> SchedResult<()> {
        let r = &mut self.table[rid];
        if now < r.start_ticks {
            return Err(SchedulerError::TemporalViolation(format!(
                "reserve {} stopped at {} before its start {}",
                rid, now, r.start_ticks
            )));
        }
        if r.current_exectime > r.exectime.ticks {
            return Err(SchedulerError::TemporalViolation(format!(
                "reserve {} consumed {} ticks of a {} tick budget",
                rid, r.current_exectime, r.exectime.ticks
            )));
        }

        let consumed = r.current_exectime.saturating_add(now - r.start_ticks);
        if consumed > r.exectime.ticks {
            debug!(
                rid,
                overrun = consumed - r.exectime.ticks,
                "enforcement latency, clamping to budget"
            );
        }
        r.current_exectime = consumed.min(r.exectime.ticks);
        r.start_ticks = now;
        r.stop_ticks = now;
        Ok(())
    }
}
