/*!
 * Time Source
 * Monotonic tick counter with tick/nanosecond conversion calibrated once
 */

use crate::core::types::{Nanos, Ticks, TimeSpan};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Tick rate of a time source, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    ticks_per_sec: u64,
}

impl Calibration {
    /// One tick per nanosecond
    pub const NANOSECOND: Calibration = Calibration {
        ticks_per_sec: 1_000_000_000,
    };

    /// Zero rates are clamped to one tick per second
    pub const fn new(ticks_per_sec: u64) -> Self {
        Self {
            ticks_per_sec: if ticks_per_sec == 0 { 1 } else { ticks_per_sec },
        }
    }

    #[inline]
    pub const fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    #[inline]
    pub fn ns_to_ticks(&self, ns: Nanos) -> Ticks {
        let ticks = u128::from(ns) * u128::from(self.ticks_per_sec) / NANOS_PER_SEC;
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }

    #[inline]
    pub fn ticks_to_ns(&self, ticks: Ticks) -> Nanos {
        let ns = u128::from(ticks) * NANOS_PER_SEC / u128::from(self.ticks_per_sec);
        Nanos::try_from(ns).unwrap_or(Nanos::MAX)
    }

    /// Span from a nanosecond duration
    #[inline]
    pub fn span(&self, ns: Nanos) -> TimeSpan {
        TimeSpan::from_parts(ns, self.ns_to_ticks(ns))
    }

    /// Span from a tick count
    #[inline]
    pub fn span_from_ticks(&self, ticks: Ticks) -> TimeSpan {
        TimeSpan::from_parts(self.ticks_to_ns(ticks), ticks)
    }
}

/// Monotonic time source
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current tick count (never decreases)
    fn now(&self) -> Ticks;

    /// Conversion fixed at startup
    fn calibration(&self) -> Calibration;

    #[inline]
    fn now_ns(&self) -> Nanos {
        self.calibration().ticks_to_ns(self.now())
    }
}

/// Wall-clock monotonic source backed by `Instant`
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
    calibration: Calibration,
}

impl MonotonicClock {
    /// Calibrate against `Instant`; ticks count nanoseconds since the epoch
    pub fn calibrate() -> Self {
        let clock = Self {
            epoch: Instant::now(),
            calibration: Calibration::NANOSECOND,
        };
        tracing::debug!(
            ticks_per_sec = clock.calibration.ticks_per_sec(),
            "Monotonic clock calibrated"
        );
        clock
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::calibrate()
    }
}

impl TimeSource for MonotonicClock {
    #[inline]
    fn now(&self) -> Ticks {
        Ticks::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(Ticks::MAX)
    }

    #[inline]
    fn calibration(&self) -> Calibration {
        self.calibration
    }
}

/// Manually advanced source for simulation and tests
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU64,
    calibration: Calibration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_calibration(Calibration::NANOSECOND)
    }

    pub fn with_calibration(calibration: Calibration) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            calibration,
        }
    }

    /// Move forward by a tick count
    pub fn advance(&self, ticks: Ticks) -> Ticks {
        self.ticks.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    /// Jump to an absolute tick count; earlier values are ignored
    pub fn advance_to(&self, ticks: Ticks) -> Ticks {
        self.ticks.fetch_max(ticks, Ordering::SeqCst).max(ticks)
    }

    /// Force the counter (can move backwards, for fault injection)
    pub fn set(&self, ticks: Ticks) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    #[inline]
    fn now(&self) -> Ticks {
        self.ticks.load(Ordering::SeqCst)
    }

    #[inline]
    fn calibration(&self) -> Calibration {
        self.calibration
    }
}
