/*!
 * Linux Host
 * Task control over OS processes using signals, SCHED_FIFO priorities and
 * CPU affinity
 */

use super::{EnforcementNotice, EnforcementSink, TaskControl, TaskHandle};
use crate::core::errors::HostError;
use crate::core::limits::NORMAL_PRIORITY;
use crate::core::types::{Pid, Priority, SignalNumber};
use nix::errno::Errno;
use nix::libc;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::sys::signal::{kill, Signal as UnixSignal};
use nix::unistd::Pid as NixPid;
use tracing::{debug, warn};

/// SCHED_FIFO priority range on Linux
const FIFO_MIN_PRIORITY: Priority = 1;
const FIFO_MAX_PRIORITY: Priority = 99;

/// Policy and priority handed to `sched_setscheduler`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SchedulingRequest {
    pub policy: libc::c_int,
    pub priority: libc::c_int,
}

/// The normal level goes back to SCHED_OTHER; everything else is SCHED_FIFO
/// clamped to the kernel's range
pub(crate) fn scheduling_request(priority: Priority) -> SchedulingRequest {
    if priority == NORMAL_PRIORITY {
        SchedulingRequest {
            policy: libc::SCHED_OTHER,
            priority: 0,
        }
    } else {
        SchedulingRequest {
            policy: libc::SCHED_FIFO,
            priority: priority.clamp(FIFO_MIN_PRIORITY, FIFO_MAX_PRIORITY),
        }
    }
}

/// OS processes controlled with SIGSTOP/SIGCONT, SCHED_FIFO priorities and
/// affinity masks
///
/// Real-time priorities need CAP_SYS_NICE; without it priority requests are
/// reported as unsupported and the worker logs them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxTasks;

impl LinuxTasks {
    pub fn new() -> Self {
        Self
    }

    fn signal(&self, task: &TaskHandle, signal: UnixSignal) -> Result<(), HostError> {
        kill(NixPid::from_raw(task.pid), signal).map_err(|e| {
            if e == nix::errno::Errno::ESRCH {
                HostError::TaskNotFound(task.pid)
            } else {
                HostError::Os(format!("{} to {}: {}", signal, task.pid, e))
            }
        })
    }
}

impl TaskControl for LinuxTasks {
    fn lookup(&self, pid: Pid) -> Option<TaskHandle> {
        if pid <= 0 {
            return None;
        }
        // Signal 0 probes for existence without delivering anything
        kill(NixPid::from_raw(pid), None)
            .ok()
            .map(|_| TaskHandle { pid })
    }

    fn set_priority(&self, task: &TaskHandle, priority: Priority) -> Result<(), HostError> {
        let request = scheduling_request(priority);
        debug!(
            pid = task.pid,
            policy = request.policy,
            priority = request.priority,
            "Setting scheduling policy"
        );

        // SAFETY: sched_param is plain old data; all-zero is a valid value
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = request.priority;
        // SAFETY: `param` outlives the call and is only read by it
        let rc = unsafe { libc::sched_setscheduler(task.pid, request.policy, &param) };
        if rc == 0 {
            return Ok(());
        }

        match Errno::last() {
            Errno::ESRCH => Err(HostError::TaskNotFound(task.pid)),
            Errno::EPERM => Err(HostError::Unsupported(format!(
                "real-time priority {} for task {} (needs CAP_SYS_NICE)",
                request.priority, task.pid
            ))),
            e => Err(HostError::Os(format!(
                "sched_setscheduler for {}: {}",
                task.pid, e
            ))),
        }
    }

    fn wake(&self, task: &TaskHandle) -> Result<(), HostError> {
        self.signal(task, UnixSignal::SIGCONT)
    }

    fn request_suspend(&self, task: &TaskHandle) -> Result<(), HostError> {
        self.signal(task, UnixSignal::SIGSTOP)
    }

    fn bind_to_core(&self, task: &TaskHandle, core: usize) -> Result<(), HostError> {
        let mut set = CpuSet::new();
        set.set(core)
            .map_err(|e| HostError::Os(format!("cpu {}: {}", core, e)))?;
        sched_setaffinity(NixPid::from_raw(task.pid), &set)
            .map_err(|e| HostError::Os(format!("affinity for {}: {}", task.pid, e)))
    }
}

/// Delivers enforcement notices as plain signals
///
/// A plain signal cannot carry the notice payload; receivers that need it
/// should use an in-process sink instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSignalSink;

impl EnforcementSink for LinuxSignalSink {
    fn deliver(
        &self,
        pid: Pid,
        signo: SignalNumber,
        notice: EnforcementNotice,
    ) -> Result<(), HostError> {
        let signal = UnixSignal::try_from(signo).map_err(|e| HostError::SignalFailed {
            pid,
            signo,
            reason: e.to_string(),
        })?;

        kill(NixPid::from_raw(pid), signal).map_err(|e| {
            warn!(pid, signo, rid = notice.rid, "Enforcement signal failed: {}", e);
            HostError::SignalFailed {
                pid,
                signo,
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::{DAEMON_PRIORITY, MIN_PRIORITY};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_self_and_missing() {
        let tasks = LinuxTasks::new();
        let me = std::process::id() as Pid;
        assert_eq!(tasks.lookup(me), Some(TaskHandle { pid: me }));
        assert_eq!(tasks.lookup(-5), None);
    }

    #[test]
    fn test_priority_maps_to_policy() {
        assert_eq!(
            scheduling_request(NORMAL_PRIORITY),
            SchedulingRequest {
                policy: libc::SCHED_OTHER,
                priority: 0,
            }
        );
        assert_eq!(
            scheduling_request(MIN_PRIORITY),
            SchedulingRequest {
                policy: libc::SCHED_FIFO,
                priority: MIN_PRIORITY,
            }
        );
        assert_eq!(scheduling_request(DAEMON_PRIORITY).priority, DAEMON_PRIORITY);
        assert_eq!(scheduling_request(150).priority, FIFO_MAX_PRIORITY);
        assert_eq!(scheduling_request(-4).priority, FIFO_MIN_PRIORITY);
    }

    #[test]
    fn test_normal_priority_and_missing_task() {
        let tasks = LinuxTasks::new();
        let me = TaskHandle {
            pid: std::process::id() as Pid,
        };
        assert!(tasks.set_priority(&me, NORMAL_PRIORITY).is_ok());

        let gone = TaskHandle { pid: i32::MAX };
        assert_eq!(
            tasks.set_priority(&gone, MIN_PRIORITY),
            Err(HostError::TaskNotFound(i32::MAX))
        );
    }
}
