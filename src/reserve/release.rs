/*!
 * Release Gate
 * Per-reserve wakeup permit; at most one pending release accumulates
 */

use std::sync::Arc;
use tokio::sync::Semaphore;

/// Single-permit gate a client blocks on between periods
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    permits: Arc<Semaphore>,
}

impl ReleaseGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Post a release; a second post before consumption is absorbed
    pub fn open(&self) {
        if self.permits.available_permits() == 0 {
            self.permits.add_permits(1);
        }
    }

    /// Take a pending release without blocking
    pub fn consume(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.permits.available_permits() > 0
    }

    /// Block until a release is posted, then consume it
    ///
    /// Returns false if the gate was closed (reserve deleted).
    pub async fn wait(&self) -> bool {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Wake every waiter with a failure
    pub fn close(&self) {
        self.permits.close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_release_accumulates() {
        let gate = ReleaseGate::new();
        gate.open();
        gate.open();
        assert!(gate.consume());
        assert!(!gate.consume());
    }

    #[tokio::test]
    async fn test_wait_returns_after_open() {
        let gate = ReleaseGate::new();
        let waiter = gate.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        gate.open();
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let gate = ReleaseGate::new();
        gate.close();
        assert!(!gate.wait().await);
        assert!(gate.is_closed());
    }

    #[test]
    fn test_wait_pending_until_open() {
        let gate = ReleaseGate::new();
        let mut wait = tokio_test::task::spawn(gate.wait());
        tokio_test::assert_pending!(wait.poll());

        gate.open();
        assert!(wait.is_woken());
        assert!(tokio_test::assert_ready!(wait.poll()));
        assert!(!gate.is_pending());
    }
}
