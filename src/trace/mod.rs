/*!
 * Scheduling Trace
 *
 * Analyzer-facing ring of state-transition records. Event codes are a fixed
 * enumeration shared with external trace tools; scheduler events use 1..=14
 * and merged hypervisor log events use codes from 50.
 */

use crate::core::limits::HYPERVISOR_EVENT_BASE;
use crate::core::types::{Nanos, Rid};
use crate::host::HypEvent;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trace event kinds (codes are stable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum TraceEvent {
    Wfnp = 1,
    StartPeriod = 2,
    Preempted = 3,
    Resumed = 4,
    BudgetEnforcement = 5,
    DontWfnp = 6,
    Idle = 7,
    EndPeriod = 8,
    WaitRelease = 9,
    WaitReleaseBlocked = 10,
    WaitReleaseNotBlocked = 11,
    StartPeriodPeriodicWait = 12,
    StartPeriodNonPeriodicWaitWakeup = 13,
    StartPeriodNonPeriodicWaitNoWakeup = 14,
    HypCreateBefore = HYPERVISOR_EVENT_BASE,
    HypCreateAfter = HYPERVISOR_EVENT_BASE + 1,
    HypExecBefore = HYPERVISOR_EVENT_BASE + 2,
    HypExecAfter = HYPERVISOR_EVENT_BASE + 3,
}

impl TraceEvent {
    const ALL: [TraceEvent; 18] = [
        TraceEvent::Wfnp,
        TraceEvent::StartPeriod,
        TraceEvent::Preempted,
        TraceEvent::Resumed,
        TraceEvent::BudgetEnforcement,
        TraceEvent::DontWfnp,
        TraceEvent::Idle,
        TraceEvent::EndPeriod,
        TraceEvent::WaitRelease,
        TraceEvent::WaitReleaseBlocked,
        TraceEvent::WaitReleaseNotBlocked,
        TraceEvent::StartPeriodPeriodicWait,
        TraceEvent::StartPeriodNonPeriodicWaitWakeup,
        TraceEvent::StartPeriodNonPeriodicWaitNoWakeup,
        TraceEvent::HypCreateBefore,
        TraceEvent::HypCreateAfter,
        TraceEvent::HypExecBefore,
        TraceEvent::HypExecAfter,
    ];

    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Arrival of a new period (first dispatch or timer-driven)
    #[inline]
    pub const fn is_period_start(self) -> bool {
        matches!(
            self,
            TraceEvent::StartPeriod
                | TraceEvent::StartPeriodPeriodicWait
                | TraceEvent::StartPeriodNonPeriodicWaitWakeup
                | TraceEvent::StartPeriodNonPeriodicWaitNoWakeup
        )
    }

    /// Job completion
    #[inline]
    pub const fn is_departure(self) -> bool {
        matches!(self, TraceEvent::Wfnp | TraceEvent::EndPeriod)
    }

    #[inline]
    pub const fn is_hypervisor(self) -> bool {
        self.code() >= HYPERVISOR_EVENT_BASE
    }

    pub const fn name(self) -> &'static str {
        match self {
            TraceEvent::Wfnp => "wait_period",
            TraceEvent::StartPeriod => "start_period",
            TraceEvent::Preempted => "preempted",
            TraceEvent::Resumed => "resumed",
            TraceEvent::BudgetEnforcement => "budget_enforcement",
            TraceEvent::DontWfnp => "dont_wait_period",
            TraceEvent::Idle => "idle",
            TraceEvent::EndPeriod => "end_period",
            TraceEvent::WaitRelease => "wait_release",
            TraceEvent::WaitReleaseBlocked => "wait_release_blocked",
            TraceEvent::WaitReleaseNotBlocked => "wait_release_not_blocked",
            TraceEvent::StartPeriodPeriodicWait => "start_period_periodic_wait",
            TraceEvent::StartPeriodNonPeriodicWaitWakeup => "start_period_non_periodic_wakeup",
            TraceEvent::StartPeriodNonPeriodicWaitNoWakeup => "start_period_non_periodic_no_wakeup",
            TraceEvent::HypCreateBefore => "hyp_create_before",
            TraceEvent::HypCreateAfter => "hyp_create_after",
            TraceEvent::HypExecBefore => "hyp_exec_before",
            TraceEvent::HypExecAfter => "hyp_exec_after",
        }
    }
}

impl From<HypEvent> for TraceEvent {
    fn from(event: HypEvent) -> Self {
        match event {
            HypEvent::CreateBefore => TraceEvent::HypCreateBefore,
            HypEvent::CreateAfter => TraceEvent::HypCreateAfter,
            HypEvent::ExecBefore => TraceEvent::HypExecBefore,
            HypEvent::ExecAfter => TraceEvent::HypExecAfter,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub timestamp_ns: Nanos,
    pub event: TraceEvent,
    pub rid: Rid,
}

/// Wire layout read by trace analyzers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RawTraceRecord {
    timestamp_ns: u64,
    event_type: i32,
    rid: i32,
}

/// Bounded ring of trace records; the oldest record is overwritten when full
pub struct TraceRing {
    ring: HeapRb<TraceRecord>,
    overwritten: u64,
}

impl fmt::Debug for TraceRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRing")
            .field("len", &self.ring.occupied_len())
            .field("capacity", &self.ring.capacity())
            .field("overwritten", &self.overwritten)
            .finish()
    }
}

impl TraceRing {
    /// A zero capacity is raised to one record
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            overwritten: 0,
        }
    }

    pub fn record(&mut self, timestamp_ns: Nanos, event: TraceEvent, rid: Rid) {
        if self.ring.is_full() {
            self.overwritten += 1;
        }
        let _ = self.ring.push_overwrite(TraceRecord {
            timestamp_ns,
            event,
            rid,
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records lost to overwrite since creation
    #[inline]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Copy of the buffered records, oldest first
    pub fn snapshot(&self) -> Vec<TraceRecord> {
        self.ring.iter().copied().collect()
    }

    /// Return and clear the buffered records
    pub fn drain(&mut self) -> Vec<TraceRecord> {
        self.ring.pop_iter().collect()
    }

    /// Encode records in the analyzer wire layout
    pub fn dump(records: &[TraceRecord]) -> Result<Vec<u8>, bincode::Error> {
        let raw: Vec<RawTraceRecord> = records
            .iter()
            .map(|r| RawTraceRecord {
                timestamp_ns: r.timestamp_ns,
                event_type: r.event.code() as i32,
                rid: r.rid as i32,
            })
            .collect();
        bincode::serialize(&raw)
    }

    /// Decode a dump produced by [`TraceRing::dump`]; unknown codes are skipped
    pub fn load(bytes: &[u8]) -> Result<Vec<TraceRecord>, bincode::Error> {
        let raw: Vec<RawTraceRecord> = bincode::deserialize(bytes)?;
        Ok(raw
            .into_iter()
            .filter_map(|r| {
                let event = u16::try_from(r.event_type).ok().and_then(TraceEvent::from_code)?;
                Some(TraceRecord {
                    timestamp_ns: r.timestamp_ns,
                    event,
                    rid: usize::try_from(r.rid).ok()?,
                })
            })
            .collect())
    }
}
