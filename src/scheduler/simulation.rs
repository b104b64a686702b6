/*!
 * Simulation
 *
 * Deterministic driver for the scheduling core: a manual clock, virtual
 * timers fired in deadline order, an in-process task registry, a simulated
 * hypervisor, and a channel capturing enforcement notices. Deferred work is
 * drained synchronously after every event, so the worker queues are always
 * empty between steps.
 */

use super::SchedulerCore;
use crate::core::config::SchedulerConfig;
use crate::core::types::{Pid, SchedResult, Ticks};
use crate::host::{ChannelSink, DeliveredNotice, LocalTasks, SimulatedHypervisor};
use crate::time::{ManualClock, TimeSource};
use crate::timers::{TimerKey, VirtualTimers};
use std::sync::Arc;
use tracing::trace;

/// Scheduling core wired to simulated collaborators
pub struct Simulation {
    core: SchedulerCore,
    clock: Arc<ManualClock>,
    timers: Arc<VirtualTimers>,
    tasks: Arc<LocalTasks>,
    hypervisor: Arc<SimulatedHypervisor>,
    notices: flume::Receiver<DeliveredNotice>,
    fired: u64,
}

impl Simulation {
    pub fn new() -> SchedResult<Self> {
        Self::with_config(SchedulerConfig::simulation())
    }

    pub fn with_config(config: SchedulerConfig) -> SchedResult<Self> {
        let clock = Arc::new(ManualClock::new());
        let timers = Arc::new(VirtualTimers::new());
        let tasks = Arc::new(LocalTasks::new());
        let hypervisor = Arc::new(SimulatedHypervisor::new(
            Arc::clone(&clock) as Arc<dyn TimeSource>
        ));
        let (sink, notices) = ChannelSink::new();

        let core = SchedulerCore::builder(Arc::clone(&clock) as Arc<dyn TimeSource>)
            .with_config(config)
            .with_timers(timers.clone())
            .with_tasks(tasks.clone())
            .with_hypervisor(hypervisor.clone())
            .with_notices(Arc::new(sink))
            .build()?;

        Ok(Self {
            core,
            clock,
            timers,
            tasks,
            hypervisor,
            notices,
            fired: 0,
        })
    }

    pub fn core(&self) -> &SchedulerCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn timers(&self) -> &VirtualTimers {
        &self.timers
    }

    pub fn tasks(&self) -> &LocalTasks {
        &self.tasks
    }

    pub fn hypervisor(&self) -> &SimulatedHypervisor {
        &self.hypervisor
    }

    #[inline]
    pub fn now(&self) -> Ticks {
        self.clock.now()
    }

    /// Timers fired so far
    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn spawn_task(&self, pid: Pid) {
        self.tasks.register(pid);
    }

    /// Make a task disappear without telling the scheduler
    pub fn kill_task(&self, pid: Pid) {
        self.tasks.unregister(pid);
    }

    /// Run a client operation, then drain deferred work
    pub fn call<T, F>(&mut self, op: F) -> SchedResult<T>
    where
        F: FnOnce(&mut SchedulerCore) -> SchedResult<T>,
    {
        let result = op(&mut self.core);
        self.core.drain_deferred()?;
        result
    }

    /// Fire the earliest pending timer, advancing the clock to its deadline
    pub fn step(&mut self) -> SchedResult<Option<TimerKey>> {
        let Some((deadline, key)) = self.timers.pop_next() else {
            return Ok(None);
        };
        self.clock.advance_to(deadline);
        trace!(rid = key.rid, kind = %key.kind, at = deadline, "firing timer");
        self.fired += 1;
        self.core.handle_timer(key)?;
        self.core.drain_deferred()?;
        Ok(Some(key))
    }

    /// Fire every timer due at or before `deadline`, then move the clock there
    ///
    /// Returns the number of timers fired.
    pub fn run_until(&mut self, deadline: Ticks) -> SchedResult<usize> {
        let mut fired = 0;
        while let Some(next) = self.timers.next_deadline() {
            if next > deadline {
                break;
            }
            self.step()?;
            fired += 1;
        }
        self.clock.advance_to(deadline);
        Ok(fired)
    }

    pub fn advance(&mut self, ticks: Ticks) -> SchedResult<usize> {
        let deadline = self.now().saturating_add(ticks);
        self.run_until(deadline)
    }

    /// Enforcement notices delivered since the last call
    pub fn take_notices(&self) -> Vec<DeliveredNotice> {
        self.notices.try_iter().collect()
    }
}
