/*!
 * In-Process Host
 * Task registry and enforcement sink for tasks living in this process
 */

use super::{EnforcementNotice, EnforcementSink, TaskControl, TaskHandle};
use crate::core::errors::HostError;
use crate::core::types::{Pid, Priority, SignalNumber};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Observable scheduling state of one in-process task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTaskState {
    pub priority: Priority,
    pub wakes: u64,
    pub suspends: u64,
    pub core: Option<usize>,
}

/// Registry of in-process tasks
///
/// Blocking of in-process tasks is carried by each reserve's release gate;
/// this registry only records what the scheduler asked for.
#[derive(Debug, Default)]
pub struct LocalTasks {
    tasks: DashMap<Pid, LocalTaskState, RandomState>,
}

impl LocalTasks {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn register(&self, pid: Pid) {
        self.tasks.entry(pid).or_default();
    }

    /// Forget a task, as if it exited
    pub fn unregister(&self, pid: Pid) -> Option<LocalTaskState> {
        self.tasks.remove(&pid).map(|(_, state)| state)
    }

    pub fn state(&self, pid: Pid) -> Option<LocalTaskState> {
        self.tasks.get(&pid).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn update<F>(&self, task: &TaskHandle, f: F) -> Result<(), HostError>
    where
        F: FnOnce(&mut LocalTaskState),
    {
        match self.tasks.get_mut(&task.pid) {
            Some(mut state) => {
                f(state.value_mut());
                Ok(())
            }
            None => Err(HostError::TaskNotFound(task.pid)),
        }
    }
}

impl TaskControl for LocalTasks {
    fn lookup(&self, pid: Pid) -> Option<TaskHandle> {
        self.tasks.contains_key(&pid).then_some(TaskHandle { pid })
    }

    fn set_priority(&self, task: &TaskHandle, priority: Priority) -> Result<(), HostError> {
        self.update(task, |s| s.priority = priority)
    }

    fn wake(&self, task: &TaskHandle) -> Result<(), HostError> {
        self.update(task, |s| s.wakes += 1)
    }

    fn request_suspend(&self, task: &TaskHandle) -> Result<(), HostError> {
        self.update(task, |s| s.suspends += 1)
    }

    fn bind_to_core(&self, task: &TaskHandle, core: usize) -> Result<(), HostError> {
        self.update(task, |s| s.core = Some(core))
    }
}

/// One delivered enforcement notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredNotice {
    pub pid: Pid,
    pub signo: SignalNumber,
    pub notice: EnforcementNotice,
}

/// Enforcement sink forwarding notices over a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: flume::Sender<DeliveredNotice>,
}

impl ChannelSink {
    pub fn new() -> (Self, flume::Receiver<DeliveredNotice>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl EnforcementSink for ChannelSink {
    fn deliver(
        &self,
        pid: Pid,
        signo: SignalNumber,
        notice: EnforcementNotice,
    ) -> Result<(), HostError> {
        self.tx
            .send(DeliveredNotice { pid, signo, notice })
            .map_err(|_| HostError::SignalFailed {
                pid,
                signo,
                reason: "receiver dropped".into(),
            })
    }
}

/// Enforcement sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EnforcementSink for LogSink {
    fn deliver(
        &self,
        pid: Pid,
        signo: SignalNumber,
        notice: EnforcementNotice,
    ) -> Result<(), HostError> {
        info!(
            pid,
            signo,
            rid = notice.rid,
            stop = notice.stop,
            periodic = notice.periodic,
            "enforcement notice"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_local_task_lifecycle() {
        let tasks = LocalTasks::new();
        tasks.register(7);
        let handle = tasks.lookup(7).unwrap();

        tasks.set_priority(&handle, 52).unwrap();
        tasks.wake(&handle).unwrap();
        tasks.bind_to_core(&handle, 0).unwrap();

        let state = tasks.state(7).unwrap();
        assert_eq!(state.priority, 52);
        assert_eq!(state.wakes, 1);
        assert_eq!(state.core, Some(0));

        tasks.unregister(7);
        assert!(tasks.lookup(7).is_none());
        assert_eq!(tasks.wake(&handle), Err(HostError::TaskNotFound(7)));
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        let notice = EnforcementNotice {
            rid: 2,
            stop: true,
            periodic: true,
        };
        sink.deliver(11, 35, notice).unwrap();
        assert_eq!(rx.try_recv().unwrap().notice, notice);

        drop(rx);
        assert!(sink.deliver(11, 35, notice).is_err());
    }
}
