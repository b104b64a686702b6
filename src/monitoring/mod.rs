/*!
 * Monitoring
 * Structured logging setup and scheduler overhead statistics
 */

mod overhead;
mod tracer;

pub use overhead::{OverheadKind, OverheadSnapshot, OverheadStat, OverheadStats};
pub use tracer::{generate_session_id, init_tracing, span_session};
