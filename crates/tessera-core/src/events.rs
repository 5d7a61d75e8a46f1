//! Lifecycle events emitted by the anchoring engine and job queue.
//!
//! Subscribers (alerting, metrics exporters, audit writers) implement
//! [`EventHandler`]. Handlers must not fail the emitting operation, so the
//! trait has no error channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BatchId, DeadLetterId, JobId};

/// Events emitted at engine state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Relayer accepted a batch root.
    BatchSubmitted {
        /// Batch that was anchored.
        batch_id: BatchId,
        /// Root hash written to the ledger.
        merkle_root: String,
        /// Ledger transaction hash.
        tx_hash: String,
        /// Attempt number that succeeded (1-based).
        attempt: u32,
    },

    /// Submitted batch reached finality.
    BatchConfirmed {
        /// Confirmed batch.
        batch_id: BatchId,
        /// When confirmation was recorded.
        confirmed_at: DateTime<Utc>,
    },

    /// Relayer call failed and the batch was dead-lettered.
    BatchFailed {
        /// Failed batch.
        batch_id: BatchId,
        /// Failure description.
        reason: String,
        /// Attempts made so far.
        attempts: u32,
        /// Earliest suggested replay time.
        next_retry_at: DateTime<Utc>,
    },

    /// Bulk job finished.
    JobCompleted {
        /// Finished job.
        job_id: JobId,
        /// Items processed successfully.
        success: usize,
        /// Items that failed.
        failed: usize,
    },

    /// Bulk job exhausted its attempts.
    JobDeadLettered {
        /// Job that failed permanently.
        job_id: JobId,
        /// Dead-letter entry holding the payload.
        dead_letter_id: DeadLetterId,
        /// Last failure reason.
        reason: String,
        /// Attempts made.
        attempts: u32,
    },
}

/// Receives engine events.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles one event. Implementations log their own failures.
    async fn handle_event(&self, event: EngineEvent);
}

/// Handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: EngineEvent) {}
}

/// Fans events out to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a handler with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: EngineEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });

        futures::future::join_all(deliveries).await;
    }
}
