/*!
 * Scheduler Types
 * Outcomes of client-visible scheduling operations and observable reserve states
 */

use crate::core::types::{Rid, Ticks};
use crate::host::HypEvent;
use crate::reserve::ReleaseGate;
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the calling client does after a period-boundary call
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// Keep running (a release was already pending, or no wait was requested)
    Continue,
    /// Block on the gate until the next release
    Sleep(ReleaseGate),
}

impl WaitOutcome {
    #[inline]
    pub fn is_sleep(&self) -> bool {
        matches!(self, WaitOutcome::Sleep(_))
    }
}

/// Result of attaching a task to a reserve
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// Dispatched immediately
    Running,
    /// Secure bootstrap: first dispatch happens when the start timer fires
    Deferred(ReleaseGate),
}

/// Last co-task creation or job start logged for one co-task id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypAnchor {
    pub event: HypEvent,
    pub at: Ticks,
}

/// What the core keeps from the merged hypervisor log
///
/// Independent of the trace ring, so draining the trace loses neither
/// preemption credit nor bootstrap anchors.
#[derive(Debug, Clone, Default)]
pub struct HypLogState {
    /// Co-tasks with an exec-before and no exec-after yet
    pub open: HashMap<Rid, Ticks>,
    pub anchors: HashMap<Rid, HypAnchor>,
}

/// Observable lifecycle state of a reserve slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveState {
    /// Created, no task attached
    Idle,
    /// Attached, between jobs
    AttachedWaiting,
    /// Head of the ready queue
    Running,
    /// Ready but behind a higher-priority reserve
    Preempted,
    /// Budget exhausted; waiting for the next period
    EnforcedBlocked,
    /// Held back by the current system criticality
    CriticalityBlocked,
    /// Slot is free
    Deleted,
}

impl ReserveState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReserveState::Idle => "idle",
            ReserveState::AttachedWaiting => "attached_waiting",
            ReserveState::Running => "running",
            ReserveState::Preempted => "preempted",
            ReserveState::EnforcedBlocked => "enforced_blocked",
            ReserveState::CriticalityBlocked => "criticality_blocked",
            ReserveState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ReserveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broken structural invariant found by the consistency check
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);
