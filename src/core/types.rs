/*!
 * Core Types
 * Common types used across the scheduler
 */

use serde::{Deserialize, Serialize};

/// Reserve ID (index into the reserve table, stable for the reserve's lifetime)
pub type Rid = usize;

/// OS task ID (negative values carry "unregister" meaning on some calls)
pub type Pid = i32;

/// Raw monotonic time-source ticks
pub type Ticks = u64;

/// Nanoseconds
pub type Nanos = u64;

/// Criticality level (higher is more important, 0 is the floor)
pub type Criticality = u32;

/// Derived fixed priority (higher runs first)
pub type Priority = i32;

/// Signal number used for cooperative enforcement notices
pub type SignalNumber = i32;

/// Common result type for scheduler operations
pub type SchedResult<T> = Result<T, super::errors::SchedulerError>;

/// A duration held in both nanoseconds and ticks
///
/// Both representations are derived from one calibration, so they never
/// drift apart. Build one with [`crate::time::Calibration::span`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub ns: Nanos,
    pub ticks: Ticks,
}

impl TimeSpan {
    pub const ZERO: TimeSpan = TimeSpan { ns: 0, ticks: 0 };

    #[inline]
    pub(crate) const fn from_parts(ns: Nanos, ticks: Ticks) -> Self {
        Self { ns, ticks }
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.ns == 0
    }

    /// Twice this span (used to push a disabled zero-slack instant past the period)
    #[inline]
    pub const fn doubled(&self) -> Self {
        Self {
            ns: self.ns.saturating_mul(2),
            ticks: self.ticks.saturating_mul(2),
        }
    }
}

/// Owner of a reserve table slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    /// Slot is free
    #[default]
    Free,
    /// Created but not yet bound to a task
    Unattached,
    /// Bound to an OS task
    Task(Pid),
}

impl Owner {
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self, Owner::Free)
    }

    #[inline]
    pub const fn pid(&self) -> Option<Pid> {
        match self {
            Owner::Task(pid) => Some(*pid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubled_span() {
        let span = TimeSpan::from_parts(400, 800);
        assert_eq!(span.doubled(), TimeSpan::from_parts(800, 1600));
        assert!(TimeSpan::ZERO.is_zero());
    }

    #[test]
    fn test_owner_pid() {
        assert_eq!(Owner::Task(42).pid(), Some(42));
        assert_eq!(Owner::Unattached.pid(), None);
        assert!(Owner::default().is_free());
    }
}
