//! Anchoring configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::{retry::anchoring_policy, RetryPolicy};

/// Settings for [`AnchorBatchManager`](crate::AnchorBatchManager) and
/// [`ConfirmationPoller`](crate::ConfirmationPoller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Backoff schedule for dead-lettered batches.
    pub retry_policy: RetryPolicy,

    /// Time after submission at which the write counts as final.
    pub finality_delay: Duration,

    /// How often the poller looks for due confirmations.
    pub poll_interval: Duration,

    /// Whether the poller replays dead letters whose retry time has passed.
    pub auto_replay: bool,

    /// Maximum dead letters replayed per poll tick.
    pub replay_batch_limit: usize,

    /// Maximum time to wait for the poller to stop.
    pub shutdown_timeout: Duration,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            retry_policy: anchoring_policy(),
            finality_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            auto_replay: false,
            replay_batch_limit: 10,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
