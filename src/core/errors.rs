/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{Pid, Rid, SignalNumber};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Collaborator (OS task control, hypervisor, signal delivery) failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum HostError {
    #[error("Task {0} not found")]
    #[diagnostic(
        code(host::task_not_found),
        help("The task may have exited. Its reserve will be torn down.")
    )]
    TaskNotFound(Pid),

    #[error("Hypercall {op} failed with code {code}")]
    #[diagnostic(
        code(host::hypercall_failed),
        help("The hypervisor rejected the request. Check the co-task table on the hypervisor side.")
    )]
    HypercallFailed { op: String, code: i32 },

    #[error("Failed to deliver signal {signo} to task {pid}: {reason}")]
    #[diagnostic(
        code(host::signal_failed),
        help("The receiving task may have exited or blocked the signal.")
    )]
    SignalFailed {
        pid: Pid,
        signo: SignalNumber,
        reason: String,
    },

    #[error("Operation not supported by this host: {0}")]
    #[diagnostic(
        code(host::unsupported),
        help("This host backend cannot perform the operation. Use a backend with the required capability.")
    )]
    Unsupported(String),

    #[error("OS error: {0}")]
    #[diagnostic(code(host::os_error), help("The underlying system call failed."))]
    Os(String),
}

/// Scheduler errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedulerError {
    #[error("Reserve id {0} is out of range")]
    #[diagnostic(
        code(scheduler::invalid_reserve),
        help("Reserve ids are indices below the table capacity.")
    )]
    InvalidReserve(Rid),

    #[error("Reserve {0} is not active")]
    #[diagnostic(
        code(scheduler::inactive_reserve),
        help("The reserve was never created or has already been deleted.")
    )]
    InactiveReserve(Rid),

    #[error("Reserve {0} is not attached to a task")]
    #[diagnostic(
        code(scheduler::not_attached),
        help("Attach the reserve to a task before using the period protocol.")
    )]
    NotAttached(Rid),

    #[error("Reserve {0} is already attached")]
    #[diagnostic(
        code(scheduler::already_attached),
        help("Delete and recreate the reserve to bind it to another task.")
    )]
    AlreadyAttached(Rid),

    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(scheduler::invalid_argument),
        help("Check that durations are positive and budgets fit within the period.")
    )]
    InvalidArgument(String),

    #[error("Task {0} not found")]
    #[diagnostic(
        code(scheduler::task_not_found),
        help("The task id does not name a live task.")
    )]
    TaskNotFound(Pid),

    #[error("No free reserve slot")]
    #[diagnostic(
        code(scheduler::no_free_reserve),
        help("All reserve slots are in use. Delete unused reserves and retry.")
    )]
    NoFreeReserve,

    #[error("Deferred queue {0} is full")]
    #[diagnostic(
        code(scheduler::queue_full),
        help("The worker is behind. Back off and retry.")
    )]
    QueueFull(String),

    #[error("Queue {0} is corrupted")]
    #[diagnostic(
        code(scheduler::queue_corrupted),
        help("A queue scan exceeded the table capacity. The operation was abandoned.")
    )]
    QueueCorrupted(String),

    #[error("Reserve {rid} rejected: response time {response_ns}ns exceeds period {period_ns}ns")]
    #[diagnostic(
        code(scheduler::admission_rejected),
        help("Reduce the budget, lengthen the period, or delete a conflicting reserve.")
    )]
    AdmissionRejected {
        rid: Rid,
        response_ns: u64,
        period_ns: u64,
    },

    #[error("Host collaborator failed: {0}")]
    #[diagnostic(transparent)]
    Host(#[from] HostError),

    #[error("Temporal invariant violated: {0}")]
    #[diagnostic(
        code(scheduler::temporal_violation),
        help("Execution-time accounting is no longer trustworthy. The scheduler has stopped.")
    )]
    TemporalViolation(String),

    #[error("Scheduler is faulted")]
    #[diagnostic(
        code(scheduler::faulted),
        help("A temporal invariant violation stopped the scheduler. Restart it.")
    )]
    Faulted,

    #[error("Command not supported: {0}")]
    #[diagnostic(
        code(scheduler::unsupported),
        help("This command is handled by a collaborator that is not configured.")
    )]
    Unsupported(String),
}

impl SchedulerError {
    /// Negative result code carried across the client boundary
    pub fn code(&self) -> i32 {
        match self {
            SchedulerError::InvalidReserve(_) => -1,
            SchedulerError::InactiveReserve(_) => -2,
            SchedulerError::NotAttached(_) => -3,
            SchedulerError::AlreadyAttached(_) => -4,
            SchedulerError::InvalidArgument(_) => -5,
            SchedulerError::TaskNotFound(_) => -6,
            SchedulerError::NoFreeReserve => -7,
            SchedulerError::QueueFull(_) => -8,
            SchedulerError::QueueCorrupted(_) => -9,
            SchedulerError::AdmissionRejected { .. } => -10,
            SchedulerError::Host(_) => -11,
            SchedulerError::TemporalViolation(_) => -12,
            SchedulerError::Faulted => -13,
            SchedulerError::Unsupported(_) => -14,
        }
    }

    /// Whether this error stops the scheduler
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::TemporalViolation(_) | SchedulerError::Faulted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_serialization() {
        let error = SchedulerError::AdmissionRejected {
            rid: 3,
            response_ns: 900,
            period_ns: 800,
        };
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: SchedulerError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_codes_are_negative_and_distinct() {
        let errors = vec![
            SchedulerError::InvalidReserve(0),
            SchedulerError::InactiveReserve(0),
            SchedulerError::NotAttached(0),
            SchedulerError::AlreadyAttached(0),
            SchedulerError::InvalidArgument("x".into()),
            SchedulerError::TaskNotFound(1),
            SchedulerError::NoFreeReserve,
            SchedulerError::QueueFull("reschedule".into()),
            SchedulerError::QueueCorrupted("ready".into()),
            SchedulerError::AdmissionRejected {
                rid: 0,
                response_ns: 0,
                period_ns: 0,
            },
            SchedulerError::Host(HostError::TaskNotFound(1)),
            SchedulerError::TemporalViolation("x".into()),
            SchedulerError::Faulted,
            SchedulerError::Unsupported("sim_crash".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_only_temporal_errors_are_fatal() {
        assert!(SchedulerError::TemporalViolation("clock".into()).is_fatal());
        assert!(!SchedulerError::QueueCorrupted("ready".into()).is_fatal());
        assert!(!SchedulerError::Host(HostError::TaskNotFound(7)).is_fatal());
    }
}
