/*!
 * Host Collaborators
 *
 * Interfaces the scheduling core needs from its environment:
 * - OS task control (lookup, priority, wake, suspend, core binding)
 * - Hypervisor co-task service (create, enable, disable, delete, log dump)
 * - Cooperative enforcement-notice delivery
 *
 * All methods are called with the scheduler lock held, so implementations
 * must return promptly and must never call back into the scheduler.
 */

mod hypervisor;
mod local;
#[cfg(target_os = "linux")]
mod linux;

pub use hypervisor::{NoHypervisor, SimulatedHypervisor};
pub use local::{ChannelSink, DeliveredNotice, LocalTaskState, LocalTasks, LogSink};
#[cfg(target_os = "linux")]
pub use linux::{LinuxSignalSink, LinuxTasks};

use crate::core::errors::HostError;
use crate::core::limits::HYPERVISOR_EVENT_BASE;
use crate::core::types::{Pid, Priority, Rid, SignalNumber, Ticks, TimeSpan};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolved OS task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub pid: Pid,
}

/// OS task-control capability set
pub trait TaskControl: Send + Sync + fmt::Debug {
    /// Resolve a task id; `None` means the task is gone
    fn lookup(&self, pid: Pid) -> Option<TaskHandle>;

    /// Fixed real-time priority; `NORMAL_PRIORITY` restores the default policy
    fn set_priority(&self, task: &TaskHandle, priority: Priority) -> Result<(), HostError>;

    /// Make a blocked task runnable
    fn wake(&self, task: &TaskHandle) -> Result<(), HostError>;

    /// Ask a running task to leave the CPU
    fn request_suspend(&self, task: &TaskHandle) -> Result<(), HostError>;

    fn bind_to_core(&self, task: &TaskHandle, core: usize) -> Result<(), HostError>;
}

/// Hypervisor co-task handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HyptaskHandle(pub u32);

/// Hypervisor preemption-log event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum HypEvent {
    CreateBefore = HYPERVISOR_EVENT_BASE,
    CreateAfter = HYPERVISOR_EVENT_BASE + 1,
    ExecBefore = HYPERVISOR_EVENT_BASE + 2,
    ExecAfter = HYPERVISOR_EVENT_BASE + 3,
}

/// One hypervisor log record; `id` is the co-task id given at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypLogEntry {
    pub timestamp: Ticks,
    pub event: HypEvent,
    pub id: Rid,
}

/// Hypervisor co-task capability set
pub trait Hypervisor: Send + Sync + fmt::Debug {
    /// Create a backstop co-task firing `first_offset` into each period
    fn create(
        &self,
        first_offset: TimeSpan,
        period: TimeSpan,
        priority: Priority,
        id: Rid,
    ) -> Result<HyptaskHandle, HostError>;

    /// A new guest job began; re-arm the backstop
    fn guest_job_start(&self, handle: HyptaskHandle) -> Result<(), HostError>;

    fn enable(&self, handle: HyptaskHandle) -> Result<(), HostError>;

    fn disable(&self, handle: HyptaskHandle) -> Result<(), HostError>;

    fn delete(&self, handle: HyptaskHandle) -> Result<(), HostError>;

    /// Drain the preemption log
    fn dump_log(&self) -> Vec<HypLogEntry>;
}

/// Payload of a cooperative budget-enforcement notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnforcementNotice {
    pub rid: Rid,
    /// The handler must stop the job (it will not be preempted otherwise)
    pub stop: bool,
    /// The job was released by its period timer rather than a soft end-of-period
    pub periodic: bool,
}

impl EnforcementNotice {
    /// Signal-value form: `(rid << 2) | (stop << 1) | periodic`
    pub fn packed(&self) -> i32 {
        ((self.rid as i32) << 2) | ((self.stop as i32) << 1) | self.periodic as i32
    }

    pub fn unpack(value: i32) -> Self {
        Self {
            rid: (value >> 2) as Rid,
            stop: value & 0b10 != 0,
            periodic: value & 0b01 != 0,
        }
    }
}

/// Delivery of enforcement notices to a registered handler
///
/// Trust boundary: the receiving handler is trusted to wind down promptly.
/// Once a notice is delivered the enforcer does not preempt the task and
/// does not wait for the handler; a misbehaving handler keeps the CPU until
/// its next period or its hypervisor backstop fires.
pub trait EnforcementSink: Send + Sync + fmt::Debug {
    fn deliver(
        &self,
        pid: Pid,
        signo: SignalNumber,
        notice: EnforcementNotice,
    ) -> Result<(), HostError>;
}
