/*!
 * Tokio Timers
 * Runtime backend: each armed timer is a sleeping task that forwards its key
 * to the dispatcher channel
 */

use super::{TimerBackend, TimerKey};
use crate::core::types::Ticks;
use crate::time::TimeSource;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sleep-per-timer backend on a tokio runtime
#[derive(Debug)]
pub struct TokioTimers {
    clock: Arc<dyn TimeSource>,
    runtime: Handle,
    fired: flume::Sender<TimerKey>,
    sleepers: Arc<DashMap<TimerKey, JoinHandle<()>, RandomState>>,
}

impl TokioTimers {
    /// Must be called from within a tokio runtime
    pub fn new(clock: Arc<dyn TimeSource>) -> (Self, flume::Receiver<TimerKey>) {
        Self::with_handle(clock, Handle::current())
    }

    pub fn with_handle(
        clock: Arc<dyn TimeSource>,
        runtime: Handle,
    ) -> (Self, flume::Receiver<TimerKey>) {
        let (fired, receiver) = flume::unbounded();
        let timers = Self {
            clock,
            runtime,
            fired,
            sleepers: Arc::new(DashMap::with_hasher(RandomState::new())),
        };
        (timers, receiver)
    }

    /// Number of sleeping timers
    pub fn outstanding(&self) -> usize {
        self.sleepers.len()
    }
}

impl TimerBackend for TokioTimers {
    fn schedule(&self, key: TimerKey, deadline: Ticks) {
        let calibration = self.clock.calibration();
        let delay_ticks = deadline.saturating_sub(self.clock.now());
        let wake_at = Instant::now() + Duration::from_nanos(calibration.ticks_to_ns(delay_ticks));

        // The sleeper waits until its handle is in the map, so its own
        // removal on firing always finds it
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let fired = self.fired.clone();
        let sleepers = Arc::clone(&self.sleepers);
        let handle = self.runtime.spawn(async move {
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep_until(wake_at).await;
            sleepers.remove(&key);
            if fired.send(key).is_err() {
                tracing::debug!(rid = key.rid, kind = %key.kind, "Timer dispatcher gone, firing dropped");
            }
        });

        if let Some(previous) = self.sleepers.insert(key, handle) {
            previous.abort();
        }
        // Fails only if the sleeper was already cancelled
        let _ = armed_tx.send(());
    }

    fn cancel(&self, key: TimerKey) {
        if let Some((_, handle)) = self.sleepers.remove(&key) {
            handle.abort();
        }
    }
}
