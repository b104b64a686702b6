/*!
 * Mixed-Trust Kernel Library
 * Zero-slack rate-monotonic reserve scheduling with hypervisor co-tasks
 */

pub mod admission;
pub mod api;
pub mod core;
pub mod deferred;
pub mod host;
pub mod monitoring;
pub mod queues;
pub mod reserve;
pub mod scheduler;
pub mod time;
pub mod timers;
pub mod trace;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::{AdmissionMode, SchedulerConfig};
pub use admission::{admit_in, is_schedulable, Admission, TaskParams};
pub use api::{Command, Request, Response, RuntimeHosts, Scheduler, SchedulerRuntime, Session};
pub use monitoring::{init_tracing, OverheadKind, OverheadSnapshot};
pub use reserve::ReserveSpec;
pub use scheduler::{SchedulerCore, Simulation, WaitOutcome};
pub use trace::{TraceEvent, TraceRecord};
