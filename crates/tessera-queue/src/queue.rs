//! Job admission, execution, retry, and dead-letter replay.
//!
//! A worker claims a due job under the snapshot lock, so each job id is owned
//! by exactly one worker at a time. Per-item progress is tracked in memory
//! and persisted with the attempt's outcome; a crash mid-attempt leaves the
//! job in `processing`, which [`ReliableJobQueue::recover_interrupted`]
//! returns to `pending` on startup.

use std::sync::Arc;

use futures::StreamExt;
use tessera_core::{
    Clock, DeadLetterId, EngineEvent, EventHandler, JobId, NoOpEventHandler, RetryDecision,
    SnapshotCell, SnapshotStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::QueueConfig,
    error::{QueueError, Result},
    job::{ItemFailure, JobPayload, JobResult, JobStatus, QueueDeadLetter, QueueState, QueueStats},
    processor::ItemProcessor,
};

/// Outcome of finalizing an attempt, used for logging and events.
enum AttemptOutcome {
    Completed,
    Retrying,
    DeadLettered(DeadLetterId),
}

/// Bulk job executor with bounded retries and a dead-letter store.
pub struct ReliableJobQueue<T: JobPayload> {
    state: SnapshotCell<QueueState<T>>,
    processor: Arc<dyn ItemProcessor<T>>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    event_handler: Arc<dyn EventHandler>,
}

impl<T: JobPayload> std::fmt::Debug for ReliableJobQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableJobQueue")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: JobPayload> ReliableJobQueue<T> {
    /// Creates a queue persisting under `job_queue:<name>`.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        processor: Arc<dyn ItemProcessor<T>>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let key = format!("job_queue:{}", config.name);
        Self {
            state: SnapshotCell::new(store, key),
            processor,
            config,
            clock,
            event_handler: Arc::new(NoOpEventHandler),
        }
    }

    /// Routes job events to `handler`.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Loads persisted jobs and recovers interrupted ones. Called once during
    /// startup, before workers run.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be loaded or written.
    pub async fn hydrate(&self) -> Result<()> {
        self.state.hydrate().await?;
        self.recover_interrupted().await?;
        Ok(())
    }

    /// Admits a job and returns its id. The job starts `pending`.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot write fails.
    pub async fn enqueue(&self, payload: Vec<T>) -> Result<JobId> {
        let total = payload.len();
        let now = self.clock.now_utc();
        let job_id = self
            .state
            .mutate(|state| Ok::<_, QueueError>(state.admit(payload, now)))
            .await?;

        info!(job_id = %job_id, queue = %self.config.name, total, "job enqueued");
        Ok(job_id)
    }

    /// Claims and runs the next due job, if any.
    ///
    /// Returns the job's result after the attempt, or `None` when nothing is
    /// due. Deterministic under a test clock.
    ///
    /// # Errors
    ///
    /// Returns error if claiming or finalizing cannot be persisted.
    pub async fn process_next(&self) -> Result<Option<JobResult>> {
        let Some((job_id, attempt, payload)) = self.claim_next().await? else {
            return Ok(None);
        };

        debug!(job_id = %job_id, attempt, total = payload.len(), "processing job");
        self.run_items(job_id, &payload).await;

        let (result, outcome) = self.finish_attempt(job_id).await?;
        self.report(&result, outcome).await;
        Ok(Some(result))
    }

    /// Current result for a job.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown job ids.
    pub async fn get_job(&self, job_id: JobId) -> Result<JobResult> {
        self.state
            .read(|state| state.jobs.get(&job_id).map(|record| record.result.clone()))
            .await?
            .ok_or_else(|| QueueError::not_found("job", job_id))
    }

    /// Aggregate job counts.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn get_stats(&self) -> Result<QueueStats> {
        let now = self.clock.now_utc();
        let stats = self
            .state
            .read(|state| {
                let mut stats =
                    QueueStats { dead_letters: state.dead_letters.len(), ..QueueStats::default() };
                for record in state.jobs.values() {
                    let result = &record.result;
                    match result.status {
                        JobStatus::Pending if result.is_due(now) => stats.pending += 1,
                        JobStatus::Pending => stats.delayed += 1,
                        JobStatus::Processing => stats.active += 1,
                        JobStatus::Completed => stats.completed += 1,
                        JobStatus::Failed => stats.failed += 1,
                    }
                }
                stats
            })
            .await?;
        Ok(stats)
    }

    /// Up to `limit` dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<QueueDeadLetter<T>>> {
        let mut entries: Vec<QueueDeadLetter<T>> =
            self.state.read(|state| state.dead_letters.values().cloned().collect()).await?;
        entries.sort_by_key(|entry| entry.failed_at);
        entries.truncate(limit);
        Ok(entries)
    }

    /// Re-enqueues a dead letter's payload as a new job.
    ///
    /// The failed job keeps its id and terminal state; the replay always gets
    /// a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown dead-letter ids.
    pub async fn replay(&self, dead_letter_id: DeadLetterId) -> Result<JobId> {
        let now = self.clock.now_utc();
        let (job_id, source_job_id) = self
            .state
            .mutate(|state| {
                let entry = state
                    .dead_letters
                    .remove(&dead_letter_id)
                    .ok_or_else(|| QueueError::not_found("dead letter", dead_letter_id))?;
                let job_id = state.admit(entry.payload, now);
                Ok::<_, QueueError>((job_id, entry.source_job_id))
            })
            .await?;

        info!(
            dead_letter_id = %dead_letter_id,
            source_job_id = %source_job_id,
            job_id = %job_id,
            "dead letter replayed as new job"
        );
        Ok(job_id)
    }

    /// Returns jobs stuck in `processing` to `pending`.
    ///
    /// Only safe before workers start; a running worker's job would be
    /// claimed twice.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot write fails.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let interrupted = self
            .state
            .read(|state| {
                state
                    .jobs
                    .values()
                    .filter(|record| record.result.status == JobStatus::Processing)
                    .count()
            })
            .await?;
        if interrupted == 0 {
            return Ok(0);
        }

        let recovered = self
            .state
            .mutate(|state| {
                let mut recovered = 0;
                for record in state.jobs.values_mut() {
                    if record.result.status == JobStatus::Processing {
                        record.result.status = JobStatus::Pending;
                        record.result.next_attempt_at = None;
                        record.result.reset_progress();
                        recovered += 1;
                    }
                }
                Ok::<_, QueueError>(recovered)
            })
            .await?;

        warn!(recovered, queue = %self.config.name, "recovered interrupted jobs");
        Ok(recovered)
    }

    /// Worker loop: processes due jobs until cancelled, idling for the poll
    /// interval when nothing is due.
    pub async fn run_worker(&self, worker_id: usize, cancellation_token: CancellationToken) {
        let poll_interval = self.config.poll_interval;

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {},
                Err(e) => {
                    warn!(worker_id, error = %e, "job processing failed");
                },
            }

            tokio::select! {
                () = self.clock.sleep(poll_interval) => {},
                () = cancellation_token.cancelled() => break,
            }
        }

        debug!(worker_id, "queue worker stopped");
    }

    /// Marks the next due job `processing`, starting a new attempt.
    async fn claim_next(&self) -> Result<Option<(JobId, u32, Vec<T>)>> {
        let now = self.clock.now_utc();
        let claimed = self
            .state
            .mutate(|state| {
                let Some(job_id) = state.next_due(now) else {
                    return Ok::<_, QueueError>(None);
                };
                let Some(record) = state.jobs.get_mut(&job_id) else {
                    return Ok(None);
                };

                let result = &mut record.result;
                result.status = JobStatus::Processing;
                result.attempts += 1;
                result.next_attempt_at = None;
                result.started_at.get_or_insert(now);
                result.reset_progress();
                Ok(Some((job_id, result.attempts, record.payload.clone())))
            })
            .await?;
        Ok(claimed)
    }

    /// Runs every item with bounded concurrency, recording each outcome.
    async fn run_items(&self, job_id: JobId, payload: &[T]) {
        let concurrency = self.config.item_concurrency.max(1);

        futures::stream::iter(payload.iter().enumerate())
            .for_each_concurrent(concurrency, |(index, item)| async move {
                let outcome = self.processor.process(item).await;

                let recorded = self
                    .state
                    .mutate_volatile(|state| {
                        let Some(record) = state.jobs.get_mut(&job_id) else {
                            return;
                        };
                        let result = &mut record.result;
                        result.processed += 1;
                        match outcome {
                            Ok(()) => result.success += 1,
                            Err(e) => {
                                result.failed += 1;
                                result.errors.push(ItemFailure { index, message: e.message });
                            },
                        }
                    })
                    .await;
                if let Err(e) = recorded {
                    error!(job_id = %job_id, index, error = %e, "failed to record item outcome");
                }
            })
            .await;
    }

    /// Completes the job, schedules a retry, or dead-letters it.
    ///
    /// An attempt fails when items ran and none succeeded.
    async fn finish_attempt(&self, job_id: JobId) -> Result<(JobResult, AttemptOutcome)> {
        let now = self.clock.now_utc();
        let policy = &self.config.retry_policy;

        self.state
            .mutate(|state| {
                let record =
                    state.jobs.get_mut(&job_id).ok_or_else(|| QueueError::not_found("job", job_id))?;
                let result = &mut record.result;

                if result.processed == 0 || result.success > 0 {
                    result.status = JobStatus::Completed;
                    result.completed_at = Some(now);
                    result.last_error = None;
                    let result = result.clone();
                    record.payload.clear();
                    return Ok((result, AttemptOutcome::Completed));
                }

                let reason = format!(
                    "all {} items failed; first error: {}",
                    result.failed,
                    result.errors.first().map_or("unknown", |failure| failure.message.as_str())
                );
                result.last_error = Some(reason.clone());

                match policy.decide(result.attempts, now) {
                    RetryDecision::Retry { next_attempt_at } => {
                        result.status = JobStatus::Pending;
                        result.next_attempt_at = Some(next_attempt_at);
                        Ok((result.clone(), AttemptOutcome::Retrying))
                    },
                    RetryDecision::GiveUp { .. } => {
                        result.status = JobStatus::Failed;
                        result.completed_at = Some(now);
                        let result = result.clone();

                        let entry = QueueDeadLetter {
                            id: DeadLetterId::new(),
                            source_job_id: job_id,
                            reason,
                            failed_at: now,
                            attempts_made: result.attempts,
                            payload: std::mem::take(&mut record.payload),
                        };
                        let dead_letter_id = entry.id;
                        state.dead_letters.insert(dead_letter_id, entry);
                        Ok((result, AttemptOutcome::DeadLettered(dead_letter_id)))
                    },
                }
            })
            .await
    }

    async fn report(&self, result: &JobResult, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Completed => {
                info!(
                    job_id = %result.job_id,
                    total = result.total,
                    success = result.success,
                    failed = result.failed,
                    attempts = result.attempts,
                    "job completed"
                );
                self.event_handler
                    .handle_event(EngineEvent::JobCompleted {
                        job_id: result.job_id,
                        success: result.success,
                        failed: result.failed,
                    })
                    .await;
            },
            AttemptOutcome::Retrying => {
                warn!(
                    job_id = %result.job_id,
                    attempt = result.attempts,
                    next_attempt_at = ?result.next_attempt_at,
                    error = result.last_error.as_deref().unwrap_or_default(),
                    "job attempt failed, retry scheduled"
                );
            },
            AttemptOutcome::DeadLettered(dead_letter_id) => {
                let reason = result.last_error.clone().unwrap_or_default();
                error!(
                    job_id = %result.job_id,
                    dead_letter_id = %dead_letter_id,
                    attempts = result.attempts,
                    error = %reason,
                    "job exhausted attempts, moved to dead letters"
                );
                self.event_handler
                    .handle_event(EngineEvent::JobDeadLettered {
                        job_id: result.job_id,
                        dead_letter_id,
                        reason,
                        attempts: result.attempts,
                    })
                    .await;
            },
        }
    }
}
