/*!
 * Zero-Slack Rate-Monotonic Scheduler
 *
 * Single-lock scheduling core. Every entry point (client calls, timer
 * firings, deferred-worker entries) runs to completion on `&mut self`;
 * callers serialize access with one mutex.
 *
 * Layout:
 * - dispatch: ready-queue start/stop and execution accounting
 * - enforcement: budget and zero-slack enforcement, hypervisor reconciliation
 * - period: start-of-period and the client wait protocol
 * - lifecycle: create, attach, delete, queries
 * - timer_dispatch: timer firing entry point
 * - worker: deferred reschedule/activate entries
 */

mod dispatch;
mod enforcement;
mod lifecycle;
mod period;
mod simulation;
mod timer_dispatch;
pub mod types;
mod worker;

pub use simulation::Simulation;
pub use types::{AttachOutcome, HypAnchor, InvariantViolation, ReserveState, WaitOutcome};

use types::HypLogState;

use crate::core::config::SchedulerConfig;
use crate::core::errors::{HostError, SchedulerError};
use crate::core::types::{Criticality, Rid, SchedResult, Ticks};
use crate::deferred::{DeferredEntry, DeferredKind, DeferredQueue};
use crate::host::{EnforcementSink, Hypervisor, LocalTasks, LogSink, NoHypervisor, TaskControl, TaskHandle};
use crate::monitoring::{OverheadKind, OverheadSnapshot, OverheadStats};
use crate::queues::{CritBlockedQueue, CritStack, RateMonotonicQueue, ReadyQueue};
use crate::reserve::{Reserve, ReserveTable};
use crate::time::{Calibration, TimeSource};
use crate::timers::{TimerBackend, TimerKind, VirtualTimers};
use crate::trace::{TraceEvent, TraceRing};
use std::sync::Arc;
use tracing::{error, warn};

/// Collaborators the core drives
#[derive(Debug, Clone)]
pub struct HostContext {
    pub clock: Arc<dyn TimeSource>,
    pub timers: Arc<dyn TimerBackend>,
    pub tasks: Arc<dyn TaskControl>,
    pub hypervisor: Arc<dyn Hypervisor>,
    pub notices: Arc<dyn EnforcementSink>,
}

/// Scheduler state: reserve table, the four intrusive queues, trace ring and
/// deferred queues
#[derive(Debug)]
pub struct SchedulerCore {
    config: SchedulerConfig,
    table: ReserveTable,
    ready: ReadyQueue,
    rm: RateMonotonicQueue,
    crit_stack: CritStack,
    crit_blocked: CritBlockedQueue,
    system_criticality: Criticality,
    trace: TraceRing,
    hyp_log: HypLogState,
    reschedule: DeferredQueue,
    activate: DeferredQueue,
    host: HostContext,
    stats: Arc<OverheadStats>,
    fault: Option<SchedulerError>,
}

/// Builder for `SchedulerCore`
///
/// Unset collaborators default to in-process ones: virtual timers, a local
/// task registry, no hypervisor and a logging enforcement sink.
pub struct SchedulerCoreBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn TimeSource>,
    timers: Option<Arc<dyn TimerBackend>>,
    tasks: Option<Arc<dyn TaskControl>>,
    hypervisor: Option<Arc<dyn Hypervisor>>,
    notices: Option<Arc<dyn EnforcementSink>>,
    stats: Option<Arc<OverheadStats>>,
}

impl SchedulerCoreBuilder {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock,
            timers: None,
            tasks: None,
            hypervisor: None,
            notices: None,
            stats: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timers(mut self, timers: Arc<dyn TimerBackend>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskControl>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_hypervisor(mut self, hypervisor: Arc<dyn Hypervisor>) -> Self {
        self.hypervisor = Some(hypervisor);
        self
    }

    pub fn with_notices(mut self, notices: Arc<dyn EnforcementSink>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Share overhead counters with an outside observer
    pub fn with_stats(mut self, stats: Arc<OverheadStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build(self) -> SchedResult<SchedulerCore> {
        self.config.validate()?;

        let host = HostContext {
            clock: self.clock,
            timers: self
                .timers
                .unwrap_or_else(|| Arc::new(VirtualTimers::new())),
            tasks: self.tasks.unwrap_or_else(|| Arc::new(LocalTasks::new())),
            hypervisor: self.hypervisor.unwrap_or_else(|| Arc::new(NoHypervisor)),
            notices: self.notices.unwrap_or_else(|| Arc::new(LogSink)),
        };

        Ok(SchedulerCore {
            table: ReserveTable::new(),
            ready: ReadyQueue::new(),
            rm: RateMonotonicQueue::new(),
            crit_stack: CritStack::new(),
            crit_blocked: CritBlockedQueue::new(),
            system_criticality: 0,
            trace: TraceRing::new(self.config.trace_capacity),
            hyp_log: HypLogState::default(),
            reschedule: DeferredQueue::bounded(
                DeferredKind::Reschedule,
                self.config.reschedule_capacity,
            ),
            activate: DeferredQueue::bounded(DeferredKind::Activate, self.config.activate_capacity),
            host,
            stats: self.stats.unwrap_or_default(),
            fault: None,
            config: self.config,
        })
    }
}

impl SchedulerCore {
    pub fn builder(clock: Arc<dyn TimeSource>) -> SchedulerCoreBuilder {
        SchedulerCoreBuilder::new(clock)
    }

    // ---- queries ----

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    #[inline]
    pub fn calibration(&self) -> Calibration {
        self.host.clock.calibration()
    }

    #[inline]
    pub fn now(&self) -> Ticks {
        self.host.clock.now()
    }

    /// Active reserve record
    pub fn reserve(&self, rid: Rid) -> Option<&Reserve> {
        self.table.get(rid).filter(|r| r.is_active())
    }

    pub fn active_reserves(&self) -> impl Iterator<Item = &Reserve> {
        self.table.iter_active()
    }

    /// Reserve occupying the CPU
    #[inline]
    pub fn running(&self) -> Option<Rid> {
        self.ready.head()
    }

    pub fn ready_order(&self) -> SchedResult<Vec<Rid>> {
        Ok(self.ready.to_vec(&self.table)?)
    }

    pub fn rm_order(&self) -> SchedResult<Vec<Rid>> {
        Ok(self.rm.to_vec(&self.table)?)
    }

    pub fn crit_stack_order(&self) -> SchedResult<Vec<Rid>> {
        Ok(self.crit_stack.to_vec(&self.table)?)
    }

    pub fn crit_blocked_order(&self) -> SchedResult<Vec<Rid>> {
        Ok(self.crit_blocked.to_vec(&self.table)?)
    }

    #[inline]
    pub fn system_criticality(&self) -> Criticality {
        self.system_criticality
    }

    pub fn state(&self, rid: Rid) -> ReserveState {
        let Some(r) = self.reserve(rid) else {
            return ReserveState::Deleted;
        };
        if !r.attached {
            return ReserveState::Idle;
        }
        if self.ready.head() == Some(rid) {
            return ReserveState::Running;
        }
        if self.ready.contains(&self.table, rid).unwrap_or(false) {
            return ReserveState::Preempted;
        }
        if r.criticality < self.system_criticality
            || self.crit_blocked.contains(&self.table, rid).unwrap_or(false)
        {
            return ReserveState::CriticalityBlocked;
        }
        if r.enforced {
            return ReserveState::EnforcedBlocked;
        }
        ReserveState::AttachedWaiting
    }

    pub fn overhead(&self) -> OverheadSnapshot {
        self.stats.snapshot()
    }

    pub fn stats(&self) -> Arc<OverheadStats> {
        Arc::clone(&self.stats)
    }

    pub fn reschedule_queue(&self) -> &DeferredQueue {
        &self.reschedule
    }

    pub fn activate_queue(&self) -> &DeferredQueue {
        &self.activate
    }

    /// Fatal error that stopped the scheduler, if any
    pub fn fault(&self) -> Option<&SchedulerError> {
        self.fault.as_ref()
    }

    /// Records dropped from the full trace ring so far
    pub fn trace_overwritten(&self) -> u64 {
        self.trace.overwritten()
    }

    // ---- shared helpers ----

    #[inline]
    fn ensure_healthy(&self) -> SchedResult<()> {
        match self.fault {
            Some(_) => Err(SchedulerError::Faulted),
            None => Ok(()),
        }
    }

    /// Latch fatal errors; every later entry point reports `Faulted`
    fn settle<T>(&mut self, result: SchedResult<T>) -> SchedResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() && self.fault.is_none() {
                error!("Scheduler faulted: {}", e);
                self.fault = Some(e.clone());
            }
        }
        result
    }

    fn trace_event(&mut self, at: Ticks, event: TraceEvent, rid: Rid) {
        let ns = self.calibration().ticks_to_ns(at);
        self.trace.record(ns, event, rid);
    }

    fn record_overhead(&self, kind: OverheadKind, entered: Ticks) {
        let elapsed = self.now().saturating_sub(entered);
        self.stats
            .record(kind, self.calibration().ticks_to_ns(elapsed));
    }

    /// Arm `kind` at an absolute deadline, replacing any earlier arming
    fn arm_timer_at(&mut self, rid: Rid, kind: TimerKind, deadline: Ticks) {
        let timer = self.table[rid].timers.get_mut(kind);
        if let Some(stale) = timer.disarm() {
            self.host.timers.cancel(stale);
        }
        let key = self.table[rid].timers.get_mut(kind).arm_at(deadline);
        self.host.timers.schedule(key, deadline);
    }

    /// Arm `kind` relative to `now` using its stored expiration
    fn arm_timer(&mut self, rid: Rid, kind: TimerKind, now: Ticks) {
        let offset = self.table[rid].timers.get(kind).expiration().ticks;
        self.arm_timer_at(rid, kind, now.saturating_add(offset));
    }

    fn cancel_timer(&mut self, rid: Rid, kind: TimerKind) {
        if let Some(key) = self.table[rid].timers.get_mut(kind).disarm() {
            self.host.timers.cancel(key);
        }
    }

    fn cancel_all_timers(&mut self, rid: Rid) {
        for kind in TimerKind::ALL {
            self.cancel_timer(rid, kind);
        }
    }

    /// Queue deferred work; a full queue is logged and the entry dropped
    fn defer(&self, kind: DeferredKind, rid: Rid) {
        let queue = match kind {
            DeferredKind::Reschedule => &self.reschedule,
            DeferredKind::Activate => &self.activate,
        };
        let entry = DeferredEntry::new(rid, self.table[rid].incarnation);
        if let Err(e) = queue.push(entry) {
            error!(rid, "Deferred {} entry lost: {}", kind, e);
        }
    }

    fn lookup_task(&self, rid: Rid) -> Option<TaskHandle> {
        self.table[rid]
            .pid()
            .and_then(|pid| self.host.tasks.lookup(pid))
    }

    /// Host failures degrade the operation, they never abort it
    fn host_call(&self, op: &str, rid: Rid, result: Result<(), HostError>) {
        if let Err(e) = result {
            warn!(rid, "{} failed: {}", op, e);
        }
    }

    // ---- consistency ----

    /// Verify the structural invariants of the queues and accounting
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let violation = |msg: String| Err(InvariantViolation(msg));

        let ready = match self.ready.to_vec(&self.table) {
            Ok(order) => order,
            Err(e) => return violation(e.to_string()),
        };
        for pair in ready.windows(2) {
            if self.table[pair[0]].priority < self.table[pair[1]].priority {
                return violation(format!(
                    "ready queue out of order: {} (prio {}) before {} (prio {})",
                    pair[0], self.table[pair[0]].priority, pair[1], self.table[pair[1]].priority
                ));
            }
        }

        let rm = match self.rm.to_vec(&self.table) {
            Ok(order) => order,
            Err(e) => return violation(e.to_string()),
        };
        for pair in rm.windows(2) {
            let (a, b) = (&self.table[pair[0]], &self.table[pair[1]]);
            if a.period.ticks > b.period.ticks {
                return violation(format!("rm queue out of period order at {}", b.rid));
            }
            if a.attached && b.attached && a.priority <= b.priority {
                return violation(format!(
                    "rm priorities not strictly decreasing at {}",
                    b.rid
                ));
            }
        }

        for order in [&ready, &rm] {
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = order.iter().find(|rid| !seen.insert(**rid)) {
                return violation(format!("reserve {} queued twice", dup));
            }
        }
        if let Some(rid) = ready.iter().find(|rid| !self.table[**rid].is_active()) {
            return violation(format!("free slot {} in ready queue", rid));
        }

        for r in self.table.iter_active() {
            if r.current_exectime > r.exectime.ticks {
                return violation(format!(
                    "reserve {} consumed {} of {} ticks",
                    r.rid, r.current_exectime, r.exectime.ticks
                ));
            }
        }

        if let Some(head) = self.ready.head() {
            let r = &self.table[head];
            let remaining = r.remaining_budget();
            if remaining > 0 {
                let expected = r.start_ticks.saturating_add(remaining);
                match r.timers.enforcement.deadline() {
                    Some(deadline) if deadline == expected => {}
                    other => {
                        return violation(format!(
                            "head {} enforcement timer {:?}, expected {}",
                            head, other, expected
                        ))
                    }
                }
            }
            if r.criticality < self.system_criticality && !r.request_stop {
                return violation(format!(
                    "head {} below system criticality {}",
                    head, self.system_criticality
                ));
            }
        }

        let expected_crit = self.crit_stack.system_criticality(&self.table);
        if self.system_criticality != expected_crit {
            return violation(format!(
                "system criticality {} but crit stack top says {}",
                self.system_criticality, expected_crit
            ));
        }

        Ok(())
    }
}
