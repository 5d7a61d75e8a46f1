//! Shared primitives for the credential anchoring engine.
//!
//! Provides strongly-typed identifiers, the clock abstraction used for
//! deterministic testing, the exponential backoff policy shared by anchoring
//! and bulk jobs, engine lifecycle events, and the snapshot persistence layer
//! that every stateful component funnels its writes through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod retry;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{EngineEvent, EventHandler, MulticastEventHandler, NoOpEventHandler};
pub use models::{BatchId, CredentialId, DeadLetterId, JobId, ListId};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use store::{memory::MemorySnapshotStore, SnapshotCell, SnapshotStore};
pub use time::{Clock, RealClock, TestClock};
