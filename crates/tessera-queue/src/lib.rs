//! Reliable executor for bulk jobs.
//!
//! A job is an arbitrary-size list of items run against a caller-supplied
//! [`ItemProcessor`] with bounded concurrency. Item failures are recorded and
//! the job keeps going; a job whose attempt produced no successes is retried
//! as a whole with exponential backoff and, once attempts are exhausted, moved
//! with its full payload into a dead-letter store for manual replay.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod job;
pub mod processor;
pub mod queue;
pub mod worker_pool;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use job::{ItemFailure, JobPayload, JobResult, JobStatus, QueueDeadLetter, QueueStats};
pub use processor::{ItemError, ItemProcessor};
pub use queue::ReliableJobQueue;
pub use worker_pool::QueueWorkerPool;
