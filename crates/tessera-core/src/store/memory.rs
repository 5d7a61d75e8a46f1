//! In-memory snapshot store for tests and single-process deployments.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicUsize, Ordering},
};

use tokio::sync::RwLock;

use super::SnapshotStore;
use crate::error::{CoreError, Result};

/// Snapshot store keeping everything in a map.
///
/// Counts loads and saves and supports one-shot failure injection so tests
/// can exercise the transient-storage paths.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
    save_error: RwLock<Option<String>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `save` fail with the given message.
    pub async fn inject_save_error(&self, message: impl Into<String>) {
        *self.save_error.write().await = Some(message.into());
    }

    /// Raw snapshot bytes stored under `key`.
    pub async fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.snapshots.read().await.get(key).cloned()
    }

    /// Number of `load` calls served.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshots.read().await.get(key).cloned())
        })
    }

    fn save<'a>(
        &'a self,
        key: &'a str,
        snapshot: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(message) = self.save_error.write().await.take() {
                return Err(CoreError::storage(message));
            }

            self.snapshots.write().await.insert(key.to_string(), snapshot);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
