/*!
 * Lock-Free Overhead Statistics
 * Uses atomic counters for zero-contention tracking of scheduler path costs
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Instrumented scheduler paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverheadKind {
    Hypercall,
    ContextSwitch,
    Enforcement,
    ZeroSlackEnforcement,
    Arrival,
    BlockedArrival,
    Departure,
}

impl OverheadKind {
    pub const ALL: [OverheadKind; 7] = [
        OverheadKind::Hypercall,
        OverheadKind::ContextSwitch,
        OverheadKind::Enforcement,
        OverheadKind::ZeroSlackEnforcement,
        OverheadKind::Arrival,
        OverheadKind::BlockedArrival,
        OverheadKind::Departure,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// Cumulative, worst-case and count for one path
#[derive(Debug)]
#[repr(C, align(64))]
struct PathCounters {
    cumulative: AtomicU64,
    worst: AtomicU64,
    count: AtomicU64,
}

impl PathCounters {
    const fn new() -> Self {
        Self {
            cumulative: AtomicU64::new(0),
            worst: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

/// Snapshot of one path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverheadStat {
    pub cumulative_ns: u64,
    pub worst_ns: u64,
    pub count: u64,
}

impl OverheadStat {
    pub fn average_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.cumulative_ns / self.count
        }
    }
}

/// Snapshot of every path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverheadSnapshot {
    pub hypercall: OverheadStat,
    pub context_switch: OverheadStat,
    pub enforcement: OverheadStat,
    pub zero_slack_enforcement: OverheadStat,
    pub arrival: OverheadStat,
    pub blocked_arrival: OverheadStat,
    pub departure: OverheadStat,
}

impl OverheadSnapshot {
    pub fn get(&self, kind: OverheadKind) -> &OverheadStat {
        match kind {
            OverheadKind::Hypercall => &self.hypercall,
            OverheadKind::ContextSwitch => &self.context_switch,
            OverheadKind::Enforcement => &self.enforcement,
            OverheadKind::ZeroSlackEnforcement => &self.zero_slack_enforcement,
            OverheadKind::Arrival => &self.arrival,
            OverheadKind::BlockedArrival => &self.blocked_arrival,
            OverheadKind::Departure => &self.departure,
        }
    }

    fn get_mut(&mut self, kind: OverheadKind) -> &mut OverheadStat {
        match kind {
            OverheadKind::Hypercall => &mut self.hypercall,
            OverheadKind::ContextSwitch => &mut self.context_switch,
            OverheadKind::Enforcement => &mut self.enforcement,
            OverheadKind::ZeroSlackEnforcement => &mut self.zero_slack_enforcement,
            OverheadKind::Arrival => &mut self.arrival,
            OverheadKind::BlockedArrival => &mut self.blocked_arrival,
            OverheadKind::Departure => &mut self.departure,
        }
    }
}

/// Atomic overhead statistics
///
/// # Performance
/// - Each path's counters sit on their own cache line
/// - All operations use relaxed ordering
/// - Snapshot requires no synchronization
#[derive(Debug)]
pub struct OverheadStats {
    paths: [PathCounters; 7],
}

impl OverheadStats {
    pub const fn new() -> Self {
        Self {
            paths: [
                PathCounters::new(),
                PathCounters::new(),
                PathCounters::new(),
                PathCounters::new(),
                PathCounters::new(),
                PathCounters::new(),
                PathCounters::new(),
            ],
        }
    }

    /// Record one traversal of `kind` costing `ns`
    ///
    /// # Performance
    /// Hot path - called on every arrival, departure and context switch
    #[inline(always)]
    pub fn record(&self, kind: OverheadKind, ns: u64) {
        let path = &self.paths[kind.index()];
        path.cumulative.fetch_add(ns, Ordering::Relaxed);
        path.worst.fetch_max(ns, Ordering::Relaxed);
        path.count.fetch_add(1, Ordering::Relaxed);
    }

    /// # Note
    /// Values may be mutually inconsistent under concurrent updates; each is accurate.
    pub fn snapshot(&self) -> OverheadSnapshot {
        let mut snapshot = OverheadSnapshot::default();
        for kind in OverheadKind::ALL {
            let path = &self.paths[kind.index()];
            *snapshot.get_mut(kind) = OverheadStat {
                cumulative_ns: path.cumulative.load(Ordering::Relaxed),
                worst_ns: path.worst.load(Ordering::Relaxed),
                count: path.count.load(Ordering::Relaxed),
            };
        }
        snapshot
    }
}

impl Default for OverheadStats {
    fn default() -> Self {
        Self::new()
    }
}
