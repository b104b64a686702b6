/*!
 * API Layer
 *
 * Client-facing surface of the scheduler: tagged request and response
 * types, a cloneable handle that serves them, per-task sessions, and the
 * runtime that drives timers and deferred work in the background.
 */

mod handle;
mod runtime;
mod types;

pub use handle::{Scheduler, Session};
pub use runtime::{RuntimeHosts, SchedulerRuntime};
pub use types::{Command, Request, Response};
