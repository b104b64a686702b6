/*!
 * Deferred Worker - Background Drain Task
 *
 * One tokio task per deferred queue. Each received reserve id is handed to
 * the handler, which takes the scheduler lock for the duration of one entry.
 */

use super::{DeferredEntry, DeferredKind};
use log::{info, warn};
use tokio::sync::mpsc;

/// Control messages for a worker task
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Stop taking entries (they stay queued)
    Pause,
    Resume,
    Shutdown,
}

/// Handle to a deferred worker task
pub struct DeferredWorker {
    kind: DeferredKind,
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl DeferredWorker {
    /// Spawn a worker draining `entries` into `handler`
    pub fn spawn<F>(
        kind: DeferredKind,
        entries: flume::Receiver<DeferredEntry>,
        handler: F,
    ) -> Self
    where
        F: Fn(DeferredEntry) + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            run_worker_loop(kind, entries, handler, command_rx).await;
        });

        info!("Deferred {} worker spawned", kind);

        Self {
            kind,
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn kind(&self) -> DeferredKind {
        self.kind
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(WorkerCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(WorkerCommand::Resume);
    }

    /// Shutdown the worker gracefully
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Deferred {} worker shutdown error: {}", self.kind, e);
            } else {
                info!("Deferred {} worker shutdown complete", self.kind);
            }
        }
    }
}

async fn run_worker_loop<F>(
    kind: DeferredKind,
    entries: flume::Receiver<DeferredEntry>,
    handler: F,
    mut command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
) where
    F: Fn(DeferredEntry),
{
    let mut active = true;

    loop {
        tokio::select! {
            entry = entries.recv_async(), if active => {
                match entry {
                    Ok(entry) => {
                        handler(entry);
                        // Drain whatever accumulated while we held the lock
                        while let Ok(entry) = entries.try_recv() {
                            handler(entry);
                        }
                        tokio::task::yield_now().await;
                    }
                    Err(_) => {
                        info!("Deferred {} queue closed", kind);
                        break;
                    }
                }
            }

            Some(cmd) = command_rx.recv() => {
                match cmd {
                    WorkerCommand::Pause => {
                        info!("Deferred {} worker paused", kind);
                        active = false;
                    }
                    WorkerCommand::Resume => {
                        info!("Deferred {} worker resumed", kind);
                        active = true;
                    }
                    WorkerCommand::Shutdown => {
                        info!("Deferred {} worker shutting down", kind);
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for DeferredWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.command_tx.send(WorkerCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredQueue;
    use pretty_assertions::assert_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let queue = DeferredQueue::bounded(DeferredKind::Reschedule, 8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = DeferredWorker::spawn(DeferredKind::Reschedule, queue.receiver(), move |entry| {
            sink.lock().push(entry.rid)
        });

        queue.push(DeferredEntry::new(4, 1)).unwrap();
        queue.push(DeferredEntry::new(7, 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.shutdown().await;

        assert_eq!(*seen.lock(), vec![4, 7]);
    }

    #[tokio::test]
    async fn test_paused_worker_leaves_entries_queued() {
        let queue = DeferredQueue::bounded(DeferredKind::Activate, 8);
        let worker = DeferredWorker::spawn(DeferredKind::Activate, queue.receiver(), |_| {});
        worker.pause();
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.push(DeferredEntry::new(1, 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);

        worker.resume();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_empty());
        worker.shutdown().await;
    }
}
