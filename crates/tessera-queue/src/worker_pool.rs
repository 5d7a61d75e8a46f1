//! Supervised queue workers with graceful shutdown.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{QueueError, Result},
    job::JobPayload,
    queue::ReliableJobQueue,
};

/// Pool of workers draining one queue.
pub struct QueueWorkerPool<T: JobPayload> {
    queue: Arc<ReliableJobQueue<T>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl<T: JobPayload> QueueWorkerPool<T> {
    /// Creates a pool; no workers run until [`spawn_workers`](Self::spawn_workers).
    pub fn new(queue: Arc<ReliableJobQueue<T>>, cancellation_token: CancellationToken) -> Self {
        Self { queue, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns the configured number of workers.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Validation` when the configured worker count is
    /// zero.
    pub fn spawn_workers(&mut self) -> Result<()> {
        let worker_count = self.queue.config().worker_count;
        if worker_count == 0 {
            return Err(QueueError::validation("worker_count must be at least 1"));
        }

        info!(worker_count, queue = %self.queue.config().name, "spawning queue workers");
        for worker_id in 0..worker_count {
            let queue = self.queue.clone();
            let token = self.cancellation_token.clone();
            self.worker_handles.push(tokio::spawn(async move {
                info!(worker_id, "queue worker starting");
                queue.run_worker(worker_id, token).await;
            }));
        }

        Ok(())
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.worker_handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Whether any worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.active_workers() > 0
    }

    /// Cancels all workers and waits for in-flight jobs to finish.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ShutdownTimeout` if workers do not stop in time,
    /// or `QueueError::WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful queue shutdown"
        );
        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let shutdown = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "queue worker panicked");
                    first_panic.get_or_insert(QueueError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, shutdown).await {
            Ok(None) => {
                info!("queue worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => {
                warn!("queue worker pool stopped with panicked workers");
                Err(panic)
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "queue shutdown timed out, some workers may still be running"
                );
                Err(QueueError::ShutdownTimeout { timeout })
            },
        }
    }
}
