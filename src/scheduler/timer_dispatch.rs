/*!
 * Timer Dispatch
 * Single entry point for every timer firing
 */

use super::SchedulerCore;
use crate::core::types::SchedResult;
use crate::deferred::DeferredKind;
use crate::timers::{TimerKey, TimerKind};
use tracing::{debug, error, trace};

impl SchedulerCore {
    /// Handle a fired timer
    ///
    /// Firings for free slots or superseded armings are ignored. When the
    /// owning task has disappeared the reserve is handed to the reschedule
    /// worker, which deletes it.
    pub fn handle_timer(&mut self, key: TimerKey) -> SchedResult<()> {
        self.ensure_healthy()?;
        let result = self.dispatch_timer(key);
        self.settle(result)
    }

    fn dispatch_timer(&mut self, key: TimerKey) -> SchedResult<()> {
        let rid = key.rid;
        let Some(reserve) = self.table.get(rid) else {
            error!(rid, kind = %key.kind, "timer fired for out-of-range reserve");
            return Ok(());
        };
        if !reserve.is_active() {
            debug!(rid, kind = %key.kind, "timer fired for free slot");
            return Ok(());
        }
        if !reserve.timers.get(key.kind).matches(&key) {
            trace!(rid, kind = %key.kind, "stale timer firing ignored");
            return Ok(());
        }

        // One-shot: the firing consumes the arming
        self.table[rid].timers.get_mut(key.kind).disarm();
        let now = self.now();

        let Some(task) = self.lookup_task(rid) else {
            debug!(rid, kind = %key.kind, "task gone, deferring reserve cleanup");
            self.table[rid].request_stop = false;
            self.defer(DeferredKind::Reschedule, rid);
            return Ok(());
        };

        match key.kind {
            TimerKind::Enforcement => self.budget_enforcement(rid, true, now),
            TimerKind::ZeroSlack => self.zs_enforcement(rid, now),
            TimerKind::Period => {
                self.start_of_period(rid, now)?;
                if self.table[rid].is_active() {
                    let r = &self.table[rid];
                    let next = r
                        .first_activation
                        .saturating_add(r.period.ticks.saturating_mul(r.job_activation_count));
                    self.arm_timer_at(rid, TimerKind::Period, next);
                }
                Ok(())
            }
            TimerKind::Start => {
                self.complete_attach(rid, &task, now)?;
                self.release_task(rid, &task);
                Ok(())
            }
        }
    }
}
