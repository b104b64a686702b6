/*!
 * Scheduler Runtime
 *
 * Wires the scheduling core to a live tokio runtime: a monotonic clock,
 * sleep-per-timer backend, a dispatcher task that feeds timer firings to the
 * core, and one deferred worker per queue.
 */

use super::handle::{Scheduler, Session};
use crate::core::config::SchedulerConfig;
use crate::core::types::{Pid, SchedResult};
use crate::deferred::{DeferredKind, DeferredWorker};
use crate::host::{EnforcementSink, Hypervisor, LocalTasks, LogSink, NoHypervisor, TaskControl};
use crate::time::{MonotonicClock, TimeSource};
use crate::timers::{TimerKey, TokioTimers};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Host collaborators for a live scheduler
#[derive(Debug, Clone)]
pub struct RuntimeHosts {
    pub tasks: Arc<dyn TaskControl>,
    pub hypervisor: Arc<dyn Hypervisor>,
    pub notices: Arc<dyn EnforcementSink>,
}

impl Default for RuntimeHosts {
    fn default() -> Self {
        Self {
            tasks: Arc::new(LocalTasks::new()),
            hypervisor: Arc::new(NoHypervisor),
            notices: Arc::new(LogSink),
        }
    }
}

impl RuntimeHosts {
    pub fn with_tasks(mut self, tasks: Arc<dyn TaskControl>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_hypervisor(mut self, hypervisor: Arc<dyn Hypervisor>) -> Self {
        self.hypervisor = hypervisor;
        self
    }

    pub fn with_notices(mut self, notices: Arc<dyn EnforcementSink>) -> Self {
        self.notices = notices;
        self
    }

    /// OS processes controlled by signals and affinity
    #[cfg(target_os = "linux")]
    pub fn linux() -> Self {
        use crate::host::{LinuxSignalSink, LinuxTasks};
        Self {
            tasks: Arc::new(LinuxTasks::new()),
            hypervisor: Arc::new(NoHypervisor),
            notices: Arc::new(LinuxSignalSink),
        }
    }
}

#[derive(Debug)]
enum DispatcherCommand {
    Shutdown,
}

/// Live scheduler with its background tasks
pub struct SchedulerRuntime {
    scheduler: Scheduler,
    command_tx: mpsc::UnboundedSender<DispatcherCommand>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<DeferredWorker>,
}

impl SchedulerRuntime {
    /// Start the scheduler; must be called from within a tokio runtime
    pub fn start(config: SchedulerConfig, hosts: RuntimeHosts) -> SchedResult<Self> {
        let clock: Arc<dyn TimeSource> = Arc::new(MonotonicClock::calibrate());
        let (timers, fired_rx) = TokioTimers::new(Arc::clone(&clock));

        let core = crate::scheduler::SchedulerCore::builder(clock)
            .with_config(config)
            .with_timers(Arc::new(timers))
            .with_tasks(hosts.tasks)
            .with_hypervisor(hosts.hypervisor)
            .with_notices(hosts.notices)
            .build()?;

        let reschedule_rx = core.reschedule_queue().receiver();
        let activate_rx = core.activate_queue().receiver();
        let scheduler = Scheduler::new(core);

        let handler = scheduler.clone();
        let reschedule = DeferredWorker::spawn(DeferredKind::Reschedule, reschedule_rx, move |entry| {
            if let Err(e) = handler.with_core(|core| core.process_reschedule(entry)) {
                warn!("Reschedule of reserve {} failed: {}", entry.rid, e);
            }
        });

        let handler = scheduler.clone();
        let activate = DeferredWorker::spawn(DeferredKind::Activate, activate_rx, move |entry| {
            if let Err(e) = handler.with_core(|core| core.process_activation(entry)) {
                warn!("Activation of reserve {} failed: {}", entry.rid, e);
            }
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let dispatcher_scheduler = scheduler.clone();
        let dispatcher = tokio::spawn(async move {
            run_dispatcher_loop(dispatcher_scheduler, fired_rx, command_rx).await;
        });

        info!("Scheduler runtime started");

        Ok(Self {
            scheduler,
            command_tx,
            dispatcher: Some(dispatcher),
            workers: vec![reschedule, activate],
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn session(&self, pid: Pid) -> Session {
        self.scheduler.session(pid)
    }

    /// Stop the dispatcher and both workers
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(DispatcherCommand::Shutdown);

        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                warn!("Timer dispatcher shutdown error: {}", e);
            }
        }
        for worker in std::mem::take(&mut self.workers) {
            worker.shutdown().await;
        }
        info!("Scheduler runtime shutdown complete");
    }
}

async fn run_dispatcher_loop(
    scheduler: Scheduler,
    fired: flume::Receiver<TimerKey>,
    mut command_rx: mpsc::UnboundedReceiver<DispatcherCommand>,
) {
    loop {
        tokio::select! {
            key = fired.recv_async() => {
                let Ok(key) = key else {
                    info!("Timer channel closed");
                    break;
                };
                if let Err(e) = scheduler.with_core(|core| core.handle_timer(key)) {
                    if e.is_fatal() {
                        error!("Scheduler faulted, stopping timer dispatch: {}", e);
                        break;
                    }
                    warn!("Timer {:?} failed: {}", key, e);
                }
            }

            Some(cmd) = command_rx.recv() => {
                match cmd {
                    DispatcherCommand::Shutdown => {
                        info!("Timer dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for SchedulerRuntime {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            let _ = self.command_tx.send(DispatcherCommand::Shutdown);
        }
    }
}

impl std::fmt::Debug for SchedulerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRuntime")
            .field("scheduler", &self.scheduler)
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Request;
    use crate::reserve::ReserveSpec;

    #[tokio::test]
    async fn test_runtime_serves_requests() {
        let tasks = Arc::new(LocalTasks::new());
        tasks.register(42);
        let hosts = RuntimeHosts::default().with_tasks(tasks.clone());
        let runtime = SchedulerRuntime::start(SchedulerConfig::default(), hosts).unwrap();

        let session = runtime.session(42);
        let rid = session
            .create(ReserveSpec::new(20_000_000, 2_000_000, 1))
            .await
            .unwrap();
        session.attach(rid).await.unwrap();
        session.wait_period(rid).await.unwrap();
        session.delete(rid).await.unwrap();

        let response = runtime
            .scheduler()
            .call(Request::DeleteReserve { rid })
            .await;
        assert!(!response.is_ok());

        runtime.shutdown().await;
    }
}
