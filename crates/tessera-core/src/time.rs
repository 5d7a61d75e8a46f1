//! Clock abstraction for deterministic retry and confirmation timing.
//!
//! Every component that computes a deadline (dead-letter `next_retry_at`,
//! confirmation due times, delayed jobs) reads time through [`Clock`] so tests
//! can drive the schedule without real sleeps.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Source of time for the engine.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for elapsed-time measurements.
    fn now(&self) -> Instant;

    /// Wall-clock time used for persisted timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the given duration.
    ///
    /// Test clocks advance virtual time instead of waiting.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same offset, so a clock handed to a component can be
/// advanced from the test body.
#[derive(Debug, Clone)]
pub struct TestClock {
    origin_instant: Instant,
    origin_system: SystemTime,
    offset_ms: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Creates a test clock starting at a fixed wall-clock time.
    pub fn starting_at(start: SystemTime) -> Self {
        Self { origin_instant: Instant::now(), origin_system: start, offset_ms: Arc::default() }
    }

    /// Creates a test clock starting at a fixed UTC timestamp.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::starting_at(SystemTime::from(start))
    }

    /// Moves time forward. Millisecond resolution.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(millis, Ordering::AcqRel);
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.origin_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        self.origin_system + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
