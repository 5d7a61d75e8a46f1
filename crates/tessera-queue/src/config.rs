//! Job queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::{retry::bulk_job_policy, RetryPolicy};

/// Settings for [`ReliableJobQueue`](crate::ReliableJobQueue) and its
/// worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name; also scopes the persisted snapshot.
    pub name: String,

    /// Number of concurrent workers, each owning one job at a time.
    pub worker_count: usize,

    /// Items processed concurrently within one job.
    pub item_concurrency: usize,

    /// Whole-job retry schedule and attempt ceiling.
    pub retry_policy: RetryPolicy,

    /// How long an idle worker waits before looking for work again.
    pub poll_interval: Duration,

    /// Maximum time to wait for workers to stop.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "bulk_issuance".to_string(),
            worker_count: 3,
            item_concurrency: 8,
            retry_policy: bulk_job_policy(),
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
