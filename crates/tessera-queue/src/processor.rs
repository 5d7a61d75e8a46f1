//! Caller-supplied per-item routine.

use async_trait::async_trait;

/// Failure of a single item. Recorded on the job; never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ItemError {
    /// Failure description.
    pub message: String,
}

impl ItemError {
    /// Creates an item error.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<String> for ItemError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ItemError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Processes one item of a bulk job.
///
/// Called once per item per attempt, possibly concurrently with other items
/// of the same job.
#[async_trait]
pub trait ItemProcessor<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Processes `item`. An error marks this item failed.
    async fn process(&self, item: &T) -> Result<(), ItemError>;
}
