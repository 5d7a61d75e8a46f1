//! Snapshot persistence for engine state.
//!
//! Stateful components keep their maps in memory and persist a full JSON
//! snapshot through a [`SnapshotStore`] after every mutation. The
//! [`SnapshotCell`] wrapper owns the hydration and write discipline:
//!
//! - Hydration is lazy and memoized. Concurrent first callers share one
//!   in-flight load; a failed load leaves the cell empty so the next caller
//!   retries. Services call [`SnapshotCell::hydrate`] during startup.
//! - Mutations run inside one async mutex. The change is applied to a copy,
//!   the copy is saved, and only then is it committed to memory. At most one
//!   snapshot write is in flight, writes land in mutation order, and a failed
//!   save leaves the in-memory state untouched.

use std::{future::Future, pin::Pin, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::{CoreError, Result};

pub mod memory;
pub mod postgres;

/// Durable key-value collaborator holding engine snapshots.
///
/// Implementations must make `save` atomic per key: a reader never observes
/// a partially written snapshot.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Loads the latest snapshot stored under `key`, if any.
    fn load<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

    /// Replaces the snapshot stored under `key`.
    fn save<'a>(
        &'a self,
        key: &'a str,
        snapshot: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// In-memory state backed by a persisted snapshot.
pub struct SnapshotCell<T> {
    key: String,
    store: Arc<dyn SnapshotStore>,
    state: OnceCell<Mutex<T>>,
}

impl<T> std::fmt::Debug for SnapshotCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("key", &self.key)
            .field("hydrated", &self.state.initialized())
            .finish()
    }
}

impl<T> SnapshotCell<T>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates an unhydrated cell persisting under `key`.
    pub fn new(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        Self { key: key.into(), store, state: OnceCell::new() }
    }

    /// Snapshot key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the snapshot has been loaded.
    pub fn is_hydrated(&self) -> bool {
        self.state.initialized()
    }

    /// Loads the snapshot if it has not been loaded yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the snapshot cannot be
    /// decoded.
    pub async fn hydrate(&self) -> Result<()> {
        self.cell().await.map(|_| ())
    }

    /// Runs a read-only closure against the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if hydration fails.
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let cell = self.cell().await?;
        let guard = cell.lock().await;
        Ok(f(&guard))
    }

    /// Applies a fallible mutation and persists the result.
    ///
    /// Nothing is written when `f` returns an error.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error, or a `CoreError` converted into `E`
    /// when hydration, encoding, or the store write fails.
    pub async fn mutate<R, E>(
        &self,
        f: impl FnOnce(&mut T) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E>
    where
        E: From<CoreError>,
    {
        let cell = self.cell().await?;
        let mut guard = cell.lock().await;

        let mut draft = guard.clone();
        let output = f(&mut draft)?;

        let snapshot = serde_json::to_vec(&draft).map_err(CoreError::from)?;
        self.store.save(&self.key, snapshot).await?;
        *guard = draft;

        Ok(output)
    }

    /// Applies a mutation to memory only.
    ///
    /// The change is written out with the next persisted mutation. Used for
    /// high-frequency progress counters that may be lost on a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if hydration fails.
    pub async fn mutate_volatile<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let cell = self.cell().await?;
        let mut guard = cell.lock().await;
        Ok(f(&mut guard))
    }

    async fn cell(&self) -> Result<&Mutex<T>> {
        self.state
            .get_or_try_init(|| async {
                let value = match self.store.load(&self.key).await? {
                    Some(bytes) => serde_json::from_slice(&bytes)?,
                    None => T::default(),
                };
                debug!(key = %self.key, "snapshot hydrated");
                Ok::<_, CoreError>(Mutex::new(value))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{memory::MemorySnapshotStore, *};

    type Counters = BTreeMap<String, u32>;

    fn cell(store: &Arc<MemorySnapshotStore>) -> SnapshotCell<Counters> {
        SnapshotCell::new(store.clone() as Arc<dyn SnapshotStore>, "counters")
    }

    #[tokio::test]
    async fn mutation_is_persisted_and_rehydrated() {
        let store = Arc::new(MemorySnapshotStore::new());

        let first = cell(&store);
        first
            .mutate(|state| {
                state.insert("issued".into(), 2);
                Ok::<_, CoreError>(())
            })
            .await
            .unwrap();

        let restarted = cell(&store);
        let issued = restarted.read(|state| state.get("issued").copied()).await.unwrap();
        assert_eq!(issued, Some(2));
    }

    #[tokio::test]
    async fn failed_save_leaves_memory_unchanged() {
        let store = Arc::new(MemorySnapshotStore::new());
        let counters = cell(&store);
        counters.hydrate().await.unwrap();

        store.inject_save_error("disk full").await;
        let result = counters
            .mutate(|state| {
                state.insert("issued".into(), 1);
                Ok::<_, CoreError>(())
            })
            .await;

        assert!(matches!(result, Err(CoreError::Storage { .. })));
        assert!(counters.read(|state| state.is_empty()).await.unwrap());
    }

    #[tokio::test]
    async fn closure_error_skips_the_write() {
        let store = Arc::new(MemorySnapshotStore::new());
        let counters = cell(&store);

        let result = counters
            .mutate(|_| Err::<(), _>(CoreError::InvalidInput("rejected".into())))
            .await;

        assert!(result.is_err());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_hydration() {
        let store = Arc::new(MemorySnapshotStore::new());
        let counters = Arc::new(cell(&store));

        let readers = (0..8).map(|_| {
            let counters = counters.clone();
            tokio::spawn(async move { counters.read(|state| state.len()).await })
        });
        for reader in futures::future::join_all(readers).await {
            assert_eq!(reader.unwrap().unwrap(), 0);
        }

        assert_eq!(store.load_count(), 1);
        assert!(counters.is_hydrated());
    }

    #[tokio::test]
    async fn volatile_changes_ride_along_with_next_write() {
        let store = Arc::new(MemorySnapshotStore::new());
        let counters = cell(&store);

        counters.mutate_volatile(|state| state.insert("progress".into(), 7)).await.unwrap();
        assert_eq!(store.save_count(), 0);

        counters
            .mutate(|state| {
                state.insert("issued".into(), 1);
                Ok::<_, CoreError>(())
            })
            .await
            .unwrap();

        let persisted: Counters =
            serde_json::from_slice(&store.snapshot("counters").await.unwrap()).unwrap();
        assert_eq!(persisted.get("progress"), Some(&7));
    }
}
