//! Exponential backoff policy shared by anchoring and bulk jobs.
//!
//! The base schedule is a pure function of the attempt count,
//! `min(base × 2^(attempt-1), max_delay)`, so retry timing is reproducible in
//! tests. Optional jitter is layered on top for production deployments where
//! many failures land at once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound for any computed delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0). Zero keeps the schedule deterministic.
    pub jitter_factor: f64,

    /// How the delay grows with each attempt.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(512),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay after every failure.
    Fixed,
    /// Delay doubles with each attempt.
    Exponential,
}

/// Outcome of evaluating a failure against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again at the given time.
    Retry {
        /// When the next attempt becomes due.
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying; the work belongs in the dead-letter store.
    GiveUp {
        /// Why retrying stopped.
        reason: String,
    },
}

impl RetryPolicy {
    /// Deterministic backoff delay after `attempt` failures (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        delay.min(self.max_delay)
    }

    /// Backoff delay with the configured jitter applied, still capped at
    /// `max_delay`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        apply_jitter(self.backoff_delay(attempt), self.jitter_factor).min(self.max_delay)
    }

    /// Time at which the next attempt becomes due.
    pub fn next_attempt_at(&self, failed_at: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        add_delay(failed_at, self.jittered_delay(attempt))
    }

    /// Next due time together with its retry-after hint in whole seconds.
    ///
    /// Both come from a single jittered delay, so the hint never points
    /// earlier than the due time.
    pub fn schedule(&self, failed_at: DateTime<Utc>, attempt: u32) -> (DateTime<Utc>, u64) {
        let delay = self.jittered_delay(attempt);
        (add_delay(failed_at, delay), whole_seconds(delay))
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Decides whether work that failed `attempts_made` times is retried.
    pub fn decide(&self, attempts_made: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if !self.has_attempts_remaining(attempts_made) {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry { next_attempt_at: self.next_attempt_at(failed_at, attempts_made) }
    }

    /// Rejects policies that can never make progress.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when `max_attempts` is zero, the base
    /// delay exceeds the maximum, or the jitter factor is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::InvalidInput("max_attempts must be at least 1".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(CoreError::InvalidInput("base_delay must not exceed max_delay".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(CoreError::InvalidInput("jitter_factor must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

/// Delay expressed in whole seconds, rounded up and never zero.
pub fn whole_seconds(delay: Duration) -> u64 {
    u64::try_from(delay.as_nanos().div_ceil(1_000_000_000)).unwrap_or(u64::MAX).max(1)
}

fn add_delay(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Randomizes a delay by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Policy for ledger anchoring: 10 attempts, 1s base, 512s cap.
pub fn anchoring_policy() -> RetryPolicy {
    RetryPolicy::default()
}

/// Policy for bulk issuance jobs: 5 attempts, 1s base, 60s cap.
pub fn bulk_job_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        ..RetryPolicy::default()
    }
}
