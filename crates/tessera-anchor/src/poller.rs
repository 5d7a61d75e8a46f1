//! Periodic confirmation of submitted batches.
//!
//! Finality is re-derived from persisted state on every tick rather than from
//! an in-memory timer, so batches restored in `submitted` after a restart are
//! picked up on the first tick.

use std::{sync::Arc, time::Duration};

use tessera_core::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{AnchorError, Result},
    manager::AnchorBatchManager,
};

/// Outcome of a single poll tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Batches moved to `confirmed`.
    pub confirmed: usize,
    /// Dead letters replayed.
    pub replayed: usize,
}

/// Background task confirming due batches and, optionally, replaying due
/// dead letters.
pub struct ConfirmationPoller {
    manager: Arc<AnchorBatchManager>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ConfirmationPoller {
    /// Creates a stopped poller.
    pub fn new(
        manager: Arc<AnchorBatchManager>,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { manager, clock, cancellation_token, handle: None }
    }

    /// Runs one tick: confirm due batches, then replay due dead letters when
    /// auto-replay is enabled.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        poll_once(&self.manager).await
    }

    /// Starts the polling loop. Calling it twice has no effect.
    pub fn spawn(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let manager = self.manager.clone();
        let clock = self.clock.clone();
        let token = self.cancellation_token.clone();
        let interval = manager.config().poll_interval;

        info!(poll_interval_ms = interval.as_millis(), "starting confirmation poller");
        self.handle = Some(tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }

                match poll_once(&manager).await {
                    Ok(outcome) if outcome != PollOutcome::default() => {
                        debug!(confirmed = outcome.confirmed, replayed = outcome.replayed, "poll tick");
                    },
                    Ok(_) => {},
                    Err(e) => warn!(error = %e, "confirmation poll failed"),
                }

                tokio::select! {
                    () = clock.sleep(interval) => {},
                    () = token.cancelled() => break,
                }
            }
            info!("confirmation poller stopped");
        }));
    }

    /// Whether the polling loop is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signals cancellation and waits for the current tick to finish.
    ///
    /// # Errors
    ///
    /// Returns `AnchorError::ShutdownTimeout` if the loop does not stop in
    /// time.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        self.cancellation_token.cancel();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "confirmation poller panicked");
                Ok(())
            },
            Err(_elapsed) => {
                error!(timeout_seconds = timeout.as_secs(), "confirmation poller shutdown timed out");
                Err(AnchorError::ShutdownTimeout { timeout })
            },
        }
    }
}

async fn poll_once(manager: &AnchorBatchManager) -> Result<PollOutcome> {
    let confirmed = manager.confirm_due().await?.len();

    let config = manager.config();
    let replayed = if config.auto_replay {
        manager.replay_due(config.replay_batch_limit).await?.len()
    } else {
        0
    };

    Ok(PollOutcome { confirmed, replayed })
}
