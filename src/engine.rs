//! Engine wiring: one store, one relayer, and the background tasks that keep
//! anchors confirmed and bulk jobs moving.

use std::sync::Arc;

use tessera_anchor::{AnchorBatchManager, AnchorError, ConfirmationPoller, LedgerRelayer};
use tessera_core::{Clock, EventHandler, SnapshotStore};
use tessera_queue::{QueueError, QueueWorkerPool, ReliableJobQueue};
use tessera_status::{RevocationStatusList, StatusListError};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config,
    issuance::{BulkIssuanceProcessor, IssuancePipeline, IssuanceRequest},
};

/// Startup and shutdown failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Anchoring state could not be loaded or the poller did not stop.
    #[error(transparent)]
    Anchor(#[from] AnchorError),

    /// Queue state could not be loaded or workers did not stop.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Status lists could not be loaded.
    #[error(transparent)]
    Status(#[from] StatusListError),
}

/// Fully wired anchoring engine.
///
/// Call [`start`](Self::start) once to hydrate persisted state and launch
/// the confirmation poller and queue workers, and
/// [`shutdown`](Self::shutdown) to stop them.
pub struct Engine {
    anchor: Arc<AnchorBatchManager>,
    status: Arc<RevocationStatusList>,
    pipeline: Arc<IssuancePipeline>,
    bulk_queue: Arc<ReliableJobQueue<IssuanceRequest>>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    poller: Option<ConfirmationPoller>,
    worker_pool: Option<QueueWorkerPool<IssuanceRequest>>,
    config: Config,
}

impl Engine {
    /// Builds every component over a shared store, relayer, and clock.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        relayer: Arc<dyn LedgerRelayer>,
        config: Config,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        let anchor = Arc::new(
            AnchorBatchManager::new(
                store.clone(),
                relayer,
                config.to_anchor_config(),
                clock.clone(),
            )
            .with_event_handler(event_handler.clone()),
        );
        let status = Arc::new(RevocationStatusList::new(
            store.clone(),
            config.to_status_list_config(),
            clock.clone(),
        ));
        let pipeline = Arc::new(IssuancePipeline::new(anchor.clone(), status.clone()));
        let bulk_queue = Arc::new(
            ReliableJobQueue::<IssuanceRequest>::new(
                store,
                Arc::new(BulkIssuanceProcessor::new(pipeline.clone())),
                config.to_queue_config(),
                clock.clone(),
            )
            .with_event_handler(event_handler),
        );

        Self {
            anchor,
            status,
            pipeline,
            bulk_queue,
            clock,
            cancellation_token: CancellationToken::new(),
            poller: None,
            worker_pool: None,
            config,
        }
    }

    /// Hydrates persisted state, then starts the confirmation poller and the
    /// bulk issuance workers. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if any snapshot cannot be loaded or workers cannot be
    /// spawned.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.poller.is_some() {
            return Ok(());
        }

        self.anchor.hydrate().await?;
        self.status.hydrate().await?;
        self.bulk_queue.hydrate().await?;

        let mut worker_pool =
            QueueWorkerPool::new(self.bulk_queue.clone(), self.cancellation_token.child_token());
        worker_pool.spawn_workers()?;

        let mut poller = ConfirmationPoller::new(
            self.anchor.clone(),
            self.clock.clone(),
            self.cancellation_token.child_token(),
        );
        poller.spawn();

        self.worker_pool = Some(worker_pool);
        self.poller = Some(poller);

        info!(
            workers = self.config.worker_pool_size,
            auto_replay = self.config.auto_replay,
            "tessera engine started"
        );
        Ok(())
    }

    /// Stops background tasks, waiting up to the configured shutdown timeout
    /// for each.
    ///
    /// # Errors
    ///
    /// Returns the first component that failed to stop in time.
    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        info!("shutting down tessera engine");
        self.cancellation_token.cancel();

        let timeout = self.config.shutdown_timeout();
        let workers = match self.worker_pool.take() {
            Some(pool) => pool.shutdown_graceful(timeout).await.map_err(EngineError::from),
            None => Ok(()),
        };
        let poller = match self.poller.take() {
            Some(poller) => poller.shutdown_graceful(timeout).await.map_err(EngineError::from),
            None => Ok(()),
        };

        workers.and(poller)
    }

    /// Anchoring manager.
    pub fn anchor(&self) -> &Arc<AnchorBatchManager> {
        &self.anchor
    }

    /// Revocation status lists.
    pub fn status_lists(&self) -> &Arc<RevocationStatusList> {
        &self.status
    }

    /// Single-credential issuance.
    pub fn pipeline(&self) -> &Arc<IssuancePipeline> {
        &self.pipeline
    }

    /// Bulk issuance queue.
    pub fn bulk_queue(&self) -> &Arc<ReliableJobQueue<IssuanceRequest>> {
        &self.bulk_queue
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("anchor", &self.anchor)
            .field("bulk_queue", &self.bulk_queue)
            .field("started", &self.poller.is_some())
            .finish_non_exhaustive()
    }
}
