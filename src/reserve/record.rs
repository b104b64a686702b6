/*!
 * Reserve Record
 * One admitted periodic task: timing contract, accounting, scheduling
 * attributes, queue links, timers, and co-task state
 */

use super::release::ReleaseGate;
use crate::core::types::{Criticality, Owner, Pid, Priority, Rid, SignalNumber, Ticks, TimeSpan};
use crate::host::HyptaskHandle;
use crate::timers::ReserveTimers;
use serde::{Deserialize, Serialize};

/// Non-owning queue links (indices into the reserve table)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    /// Ready queue, priority order
    pub next: Option<Rid>,
    /// Rate-monotonic queue, period order
    pub rm_next: Option<Rid>,
    /// Criticality stack
    pub crit_next: Option<Rid>,
    /// Criticality-blocked queue
    pub crit_block_next: Option<Rid>,
}

/// Registered cooperative enforcement handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRegistration {
    pub pid: Pid,
    pub signo: SignalNumber,
}

/// Reserve record
#[derive(Debug, Clone)]
pub struct Reserve {
    pub rid: Rid,
    /// Bumped each time the slot is handed to a new reserve
    pub incarnation: u64,
    pub owner: Owner,
    pub attached: bool,

    // Timing contract
    pub period: TimeSpan,
    pub exectime: TimeSpan,
    pub nominal_exectime: TimeSpan,
    pub zsinstant: TimeSpan,
    pub hyp_enforcer_instant: TimeSpan,
    pub has_zs_enforcement: bool,

    // Accounting (ticks)
    pub current_exectime: Ticks,
    pub worst_exectime: Ticks,
    pub avg_exectime_sum: Ticks,
    pub avg_samples: u64,
    pub start_ticks: Ticks,
    pub stop_ticks: Ticks,
    pub first_activation: Ticks,
    pub job_activation_count: u64,
    pub current_job_activation: Ticks,
    pub current_deadline: Ticks,
    /// Hypervisor preemption observed in the current job window, accumulated
    /// as the co-task log is merged
    pub hyp_observed: Ticks,
    /// Hypervisor preemption already credited in the current job
    pub hyp_preemption: Ticks,
    pub job_completed: bool,

    // Scheduling attributes
    pub priority: Priority,
    pub criticality: Criticality,
    pub in_critical_mode: bool,
    pub enforced: bool,
    pub request_stop: bool,
    /// Budget enforcement already ran for the current job
    pub enforcement_pending: bool,
    pub bound_to_cpu: bool,
    /// Jobs started and not yet completed (more than one is a duplicate arrival)
    pub pending_starts: u32,
    pub non_periodic_wait: bool,
    pub end_of_period_marked: bool,
    /// Client currently blocked in a release wait
    pub waiting_release: bool,

    // Counters
    pub num_enforcements: u64,
    pub num_wfnp: u64,
    pub blocked_arrivals: u64,

    pub links: Links,
    pub timers: ReserveTimers,

    // Hypervisor co-task
    pub has_hyptask: bool,
    pub hypertask_active: bool,
    pub hyptask_handle: Option<HyptaskHandle>,

    pub enforcement_signal: Option<SignalRegistration>,
    pub release: ReleaseGate,
}

impl Reserve {
    /// A free slot
    pub fn vacant(rid: Rid) -> Self {
        Self {
            rid,
            incarnation: 0,
            owner: Owner::Free,
            attached: false,
            period: TimeSpan::ZERO,
            exectime: TimeSpan::ZERO,
            nominal_exectime: TimeSpan::ZERO,
            zsinstant: TimeSpan::ZERO,
            hyp_enforcer_instant: TimeSpan::ZERO,
            has_zs_enforcement: false,
            current_exectime: 0,
            worst_exectime: 0,
            avg_exectime_sum: 0,
            avg_samples: 0,
            start_ticks: 0,
            stop_ticks: 0,
            first_activation: 0,
            job_activation_count: 0,
            current_job_activation: 0,
            current_deadline: 0,
            hyp_observed: 0,
            hyp_preemption: 0,
            job_completed: false,
            priority: 0,
            criticality: 0,
            in_critical_mode: false,
            enforced: false,
            request_stop: false,
            enforcement_pending: false,
            bound_to_cpu: false,
            pending_starts: 0,
            non_periodic_wait: false,
            end_of_period_marked: false,
            waiting_release: false,
            num_enforcements: 0,
            num_wfnp: 0,
            blocked_arrivals: 0,
            links: Links::default(),
            timers: ReserveTimers::new(rid),
            has_hyptask: false,
            hypertask_active: false,
            hyptask_handle: None,
            enforcement_signal: None,
            release: ReleaseGate::new(),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.owner.is_free()
    }

    #[inline]
    pub fn pid(&self) -> Option<Pid> {
        self.owner.pid()
    }

    /// Budget left in this period
    #[inline]
    pub fn remaining_budget(&self) -> Ticks {
        self.exectime.ticks.saturating_sub(self.current_exectime)
    }

    /// Whether the job ran past its nominal budget
    #[inline]
    pub fn exceeded_nominal(&self) -> bool {
        self.current_exectime > self.nominal_exectime.ticks
    }

    /// Fold a finished job into worst/average statistics and clear the per-period counters
    pub fn reset_exectime_counters(&mut self) {
        if self.current_exectime > self.worst_exectime {
            self.worst_exectime = self.current_exectime;
        }
        self.avg_exectime_sum = self.avg_exectime_sum.saturating_add(self.current_exectime);
        self.avg_samples += 1;
        self.current_exectime = 0;
        self.in_critical_mode = false;
        self.enforcement_pending = false;
    }

    /// Average observed execution (ticks), zero before the first sample
    #[inline]
    pub fn average_exectime(&self) -> Ticks {
        if self.avg_samples == 0 {
            0
        } else {
            self.avg_exectime_sum / self.avg_samples
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exectime_statistics() {
        let mut r = Reserve::vacant(0);
        r.exectime = TimeSpan::from_parts(100, 100);
        r.nominal_exectime = TimeSpan::from_parts(50, 50);

        r.current_exectime = 60;
        assert!(r.exceeded_nominal());
        assert_eq!(r.remaining_budget(), 40);
        r.reset_exectime_counters();

        r.current_exectime = 20;
        r.reset_exectime_counters();

        assert_eq!(r.worst_exectime, 60);
        assert_eq!(r.average_exectime(), 40);
        assert_eq!(r.current_exectime, 0);
    }

    #[test]
    fn test_vacant_slot() {
        let r = Reserve::vacant(9);
        assert!(!r.is_active());
        assert_eq!(r.average_exectime(), 0);
        assert_eq!(r.timers.period.rid(), 9);
    }
}
