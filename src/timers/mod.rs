/*!
 * Timer Subsystem
 *
 * Per-reserve timers (period, enforcement, zero-slack, start) armed against
 * the time source. A timer record lives inside its reserve; the countdown
 * itself is delegated to a [`TimerBackend`].
 *
 * Every arm bumps the record's generation. A firing carries the generation
 * it was armed with, so a firing that raced with a cancel or re-arm no longer
 * matches and is dropped by the dispatcher.
 */

mod tokio_backend;
mod virtual_backend;

pub use tokio_backend::TokioTimers;
pub use virtual_backend::VirtualTimers;

use crate::core::types::{Rid, Ticks, TimeSpan};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timer kind tag, matched by the scheduler's timer dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Start of the next period
    Period,
    /// Budget exhausted
    Enforcement,
    /// Zero-slack instant reached
    ZeroSlack,
    /// Deferred first dispatch (secure bootstrap)
    Start,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Period,
        TimerKind::Enforcement,
        TimerKind::ZeroSlack,
        TimerKind::Start,
    ];
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::Period => "period",
            TimerKind::Enforcement => "enforcement",
            TimerKind::ZeroSlack => "zero_slack",
            TimerKind::Start => "start",
        };
        f.write_str(name)
    }
}

/// Identity of one arming of one timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub rid: Rid,
    pub kind: TimerKind,
    pub generation: u64,
}

/// Timer record embedded in a reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    rid: Rid,
    kind: TimerKind,
    /// Duration relative to arming
    expiration: TimeSpan,
    /// Absolute deadline while armed
    deadline: Option<Ticks>,
    generation: u64,
}

impl Timer {
    pub const fn new(rid: Rid, kind: TimerKind) -> Self {
        Self {
            rid,
            kind,
            expiration: TimeSpan::ZERO,
            deadline: None,
            generation: 0,
        }
    }

    #[inline]
    pub const fn rid(&self) -> Rid {
        self.rid
    }

    #[inline]
    pub const fn kind(&self) -> TimerKind {
        self.kind
    }

    #[inline]
    pub const fn expiration(&self) -> TimeSpan {
        self.expiration
    }

    #[inline]
    pub fn set_expiration(&mut self, expiration: TimeSpan) {
        self.expiration = expiration;
    }

    #[inline]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[inline]
    pub const fn deadline(&self) -> Option<Ticks> {
        self.deadline
    }

    /// Ticks until expiry, zero once due or when disarmed
    #[inline]
    pub fn remaining(&self, now: Ticks) -> Ticks {
        self.deadline.map_or(0, |d| d.saturating_sub(now))
    }

    /// Record an arming at an absolute deadline
    pub(crate) fn arm_at(&mut self, deadline: Ticks) -> TimerKey {
        self.generation = self.generation.wrapping_add(1);
        self.deadline = Some(deadline);
        self.key()
    }

    /// Clear the arming, returning the key the backend was given
    pub(crate) fn disarm(&mut self) -> Option<TimerKey> {
        let key = self.deadline.take().map(|_| self.key());
        self.generation = self.generation.wrapping_add(1);
        key
    }

    /// Whether a firing belongs to the current arming
    #[inline]
    pub fn matches(&self, key: &TimerKey) -> bool {
        self.deadline.is_some() && key.generation == self.generation && key.kind == self.kind
    }

    #[inline]
    fn key(&self) -> TimerKey {
        TimerKey {
            rid: self.rid,
            kind: self.kind,
            generation: self.generation,
        }
    }
}

/// The four timers of one reserve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveTimers {
    pub period: Timer,
    pub enforcement: Timer,
    pub zero_slack: Timer,
    pub start: Timer,
}

impl ReserveTimers {
    pub const fn new(rid: Rid) -> Self {
        Self {
            period: Timer::new(rid, TimerKind::Period),
            enforcement: Timer::new(rid, TimerKind::Enforcement),
            zero_slack: Timer::new(rid, TimerKind::ZeroSlack),
            start: Timer::new(rid, TimerKind::Start),
        }
    }

    #[inline]
    pub fn get(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::Period => &self.period,
            TimerKind::Enforcement => &self.enforcement,
            TimerKind::ZeroSlack => &self.zero_slack,
            TimerKind::Start => &self.start,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::Period => &mut self.period,
            TimerKind::Enforcement => &mut self.enforcement,
            TimerKind::ZeroSlack => &mut self.zero_slack,
            TimerKind::Start => &mut self.start,
        }
    }
}

/// Countdown primitive the scheduler arms timers against
///
/// Called with the scheduler lock held: implementations must not block and
/// must not call back into the scheduler synchronously.
pub trait TimerBackend: Send + Sync + fmt::Debug {
    /// Deliver `key` to the dispatcher once the time source reaches `deadline`
    fn schedule(&self, key: TimerKey, deadline: Ticks);

    /// Best-effort withdrawal of a scheduled key
    fn cancel(&self, key: TimerKey);
}
