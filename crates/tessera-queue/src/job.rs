//! Job records, results, and dead letters.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tessera_core::{DeadLetterId, JobId};

/// Bounds required of job items: they are persisted in snapshots and shared
/// across worker tasks.
pub trait JobPayload: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> JobPayload for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker, possibly until a retry time.
    Pending,
    /// Owned by a worker.
    Processing,
    /// Finished with at least one successful item.
    Completed,
    /// Attempts exhausted; payload moved to the dead-letter store.
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Error captured for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Item position in the payload.
    pub index: usize,
    /// Failure description.
    pub message: String,
}

/// Progress and outcome of a job. Counters describe the current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job identifier.
    pub job_id: JobId,
    /// Current state.
    pub status: JobStatus,
    /// Items in the payload.
    pub total: usize,
    /// Items finished in this attempt.
    pub processed: usize,
    /// Items that succeeded in this attempt.
    pub success: usize,
    /// Items that failed in this attempt.
    pub failed: usize,
    /// Per-item failures of this attempt, in completion order.
    pub errors: Vec<ItemFailure>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Why the last attempt failed.
    pub last_error: Option<String>,
    /// Earliest start of the next attempt, when retrying.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Start of the first attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
}

impl JobResult {
    pub(crate) fn new(job_id: JobId, total: usize, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            total,
            processed: 0,
            success: 0,
            failed: 0,
            errors: Vec::new(),
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            started_at: None,
            completed_at: None,
            created_at,
        }
    }

    /// Share of items processed in the current attempt, 0 to 100.
    ///
    /// An empty job is reported as fully processed.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    /// Whether the job is due for a worker at `now`.
    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Clears per-attempt counters.
    pub(crate) fn reset_progress(&mut self) {
        self.processed = 0;
        self.success = 0;
        self.failed = 0;
        self.errors.clear();
    }
}

/// A parked job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeadLetter<T> {
    /// Dead-letter identifier used for replay.
    pub id: DeadLetterId,
    /// Job that failed.
    pub source_job_id: JobId,
    /// Last failure reason.
    pub reason: String,
    /// When the job was given up on.
    pub failed_at: DateTime<Utc>,
    /// Attempts made.
    pub attempts_made: u32,
    /// Full original payload.
    pub payload: Vec<T>,
}

/// Aggregate counts for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting and due now.
    pub pending: usize,
    /// Jobs owned by a worker.
    pub active: usize,
    /// Jobs finished successfully.
    pub completed: usize,
    /// Jobs that exhausted their attempts.
    pub failed: usize,
    /// Jobs waiting for a retry time in the future.
    pub delayed: usize,
    /// Dead letters awaiting replay.
    pub dead_letters: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct JobRecord<T> {
    pub(crate) result: JobResult,
    /// Emptied once the job is terminal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) payload: Vec<T>,
    /// Admission order; ties between due jobs go to the lowest.
    pub(crate) sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueState<T> {
    pub(crate) jobs: BTreeMap<JobId, JobRecord<T>>,
    pub(crate) dead_letters: BTreeMap<DeadLetterId, QueueDeadLetter<T>>,
    pub(crate) next_sequence: u64,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self { jobs: BTreeMap::new(), dead_letters: BTreeMap::new(), next_sequence: 0 }
    }
}

impl<T: Clone> QueueState<T> {
    /// Admits a payload as a new pending job.
    pub(crate) fn admit(&mut self, payload: Vec<T>, now: DateTime<Utc>) -> JobId {
        let job_id = JobId::new();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.jobs.insert(
            job_id,
            JobRecord { result: JobResult::new(job_id, payload.len(), now), payload, sequence },
        );
        job_id
    }

    /// Earliest-admitted job that is due at `now`.
    pub(crate) fn next_due(&self, now: DateTime<Utc>) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|record| record.result.is_due(now))
            .min_by_key(|record| record.sequence)
            .map(|record| record.result.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_relative_to_total() {
        let mut result = JobResult::new(JobId::new(), 8, Utc::now());
        assert_eq!(result.progress_percent(), 0.0);

        result.processed = 2;
        assert_eq!(result.progress_percent(), 25.0);

        let empty = JobResult::new(JobId::new(), 0, Utc::now());
        assert_eq!(empty.progress_percent(), 100.0);
    }

    #[test]
    fn due_jobs_are_picked_in_admission_order() {
        let now = Utc::now();
        let mut state = QueueState::default();
        let first = state.admit(vec![1u32], now);
        let second = state.admit(vec![2u32], now);

        assert_eq!(state.next_due(now), Some(first));

        if let Some(record) = state.jobs.get_mut(&first) {
            record.result.next_attempt_at = Some(now + chrono::Duration::seconds(5));
        }
        assert_eq!(state.next_due(now), Some(second));
        assert_eq!(state.next_due(now + chrono::Duration::seconds(5)), Some(first));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
