/*!
 * System Limits and Constants
 *
 * Centralized location for scheduler-wide limits, thresholds, and magic numbers.
 * Organized by domain for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Constants shared with external trace analyzers are marked with [COMPAT]
 */

// =============================================================================
// RESERVE TABLE
// =============================================================================

/// Reserve table capacity
/// Also bounds every intrusive queue scan
pub const MAX_RESERVES: usize = 100;

// =============================================================================
// PRIORITIES
// =============================================================================

/// Priority given to the lowest-priority attached reserve
pub const MIN_PRIORITY: i32 = 50;

/// Priority of the deferred-work workers
/// Reserves assigned at or above this value compete with the workers
pub const DAEMON_PRIORITY: i32 = 90;

/// Priority restored on a task when its reserve is deleted
pub const NORMAL_PRIORITY: i32 = 0;

// =============================================================================
// TRACING
// =============================================================================

/// Trace ring capacity (records)
/// [COMPAT] Analyzers size their read buffers from this value
pub const TRACE_BUFFER_SIZE: usize = 100_000;

/// Lowest event code used by hypervisor log records
/// [COMPAT] Scheduler events stay below this value
pub const HYPERVISOR_EVENT_BASE: u16 = 50;

// =============================================================================
// ADMISSION
// =============================================================================

/// Upper bound on response-time recurrence iterations
/// [PERF] Divergent recurrences stop here instead of walking to the deadline
pub const MAX_RTA_ITERATIONS: usize = 1_000;

// =============================================================================
// SECURE BOOTSTRAP
// =============================================================================

/// Maximum whole-period steps when projecting a start instant into the future
pub const MAX_START_TIME_STEPS: usize = 100;

// =============================================================================
// DEFERRED WORK
// =============================================================================

/// Default capacity of each deferred-work queue
/// Every reserve can have at most one pending entry per queue in steady state
pub const DEFERRED_QUEUE_CAPACITY: usize = MAX_RESERVES;

/// CPU core the activator pins reserves to
pub const DEFAULT_WORKER_CORE: usize = 0;
