//! Revocation status list allocator and publisher.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{Clock, CredentialId, ListId, SnapshotCell, SnapshotStore};
use tracing::{debug, info, warn};

use crate::{
    bitstring,
    error::{Result, StatusListError},
    DEFAULT_LIST_CAPACITY,
};

/// Snapshot key for status list state.
const SNAPSHOT_KEY: &str = "status_lists";

/// Status list configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusListConfig {
    /// Capacity given to lists created implicitly on first registration.
    pub default_capacity: usize,
}

impl Default for StatusListConfig {
    fn default() -> Self {
        Self { default_capacity: DEFAULT_LIST_CAPACITY }
    }
}

/// One credential's slot in a status list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// List holding the slot.
    pub list_id: ListId,
    /// Permanent index within the list.
    pub index: usize,
    /// Whether the credential is revoked.
    pub revoked: bool,
    /// Credential occupying the slot.
    pub credential_id: CredentialId,
    /// Last change to this entry.
    pub updated_at: DateTime<Utc>,
}

/// Published form of a list, consumable by bit-indexed status verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusListPublication {
    /// List identifier.
    pub id: ListId,
    /// Unpadded base64url bitstring.
    pub bitstring: String,
    /// Number of bits the bitstring covers (the list capacity).
    pub size: usize,
    /// Number of revoked entries.
    pub revoked_count: usize,
    /// Hex SHA-256 of the raw bitstring bytes.
    pub digest: String,
    /// Last registration or revocation in this list.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListState {
    capacity: usize,
    next_index: usize,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatusState {
    lists: BTreeMap<ListId, ListState>,
    entries: BTreeMap<CredentialId, StatusEntry>,
}

/// Capacity-bounded index allocator with bitstring materialization.
///
/// Indices are assigned monotonically from 0 within each list and are never
/// reused. A full list rejects registration instead of wrapping around.
pub struct RevocationStatusList {
    state: SnapshotCell<StatusState>,
    config: StatusListConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RevocationStatusList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationStatusList")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

impl RevocationStatusList {
    /// Creates a status list service persisting through `store`.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        config: StatusListConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { state: SnapshotCell::new(store, SNAPSHOT_KEY), config, clock }
    }

    /// Loads persisted lists. Called once during startup.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be loaded.
    pub async fn hydrate(&self) -> Result<()> {
        Ok(self.state.hydrate().await?)
    }

    /// Creates a list with an explicit capacity.
    ///
    /// Provisioning an existing list with the same capacity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StatusListError::Validation` for a zero capacity or when the
    /// list already exists with a different capacity.
    pub async fn provision_list(&self, list_id: &ListId, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(StatusListError::validation("list capacity must be positive"));
        }

        let now = self.clock.now_utc();
        self.state
            .mutate(|state| match state.lists.get(list_id) {
                Some(list) if list.capacity == capacity => Ok(()),
                Some(list) => Err(StatusListError::validation(format!(
                    "list '{list_id}' already provisioned with capacity {}",
                    list.capacity
                ))),
                None => {
                    state
                        .lists
                        .insert(list_id.clone(), ListState { capacity, next_index: 0, updated_at: now });
                    Ok(())
                },
            })
            .await?;

        info!(list_id = %list_id, capacity, "status list provisioned");
        Ok(())
    }

    /// Assigns the next free index in `list_id` to `credential_id`.
    ///
    /// The list is created with the default capacity if it does not exist.
    /// Registering an already registered credential returns its existing
    /// entry without consuming an index.
    ///
    /// # Errors
    ///
    /// Returns `StatusListError::Capacity` when the list is full; no index is
    /// consumed in that case.
    pub async fn register_credential(
        &self,
        credential_id: &CredentialId,
        list_id: &ListId,
    ) -> Result<StatusEntry> {
        let now = self.clock.now_utc();
        let default_capacity = self.config.default_capacity;

        let entry = self
            .state
            .mutate(|state| {
                if let Some(existing) = state.entries.get(credential_id) {
                    return Ok(existing.clone());
                }

                let list = state.lists.entry(list_id.clone()).or_insert_with(|| ListState {
                    capacity: default_capacity,
                    next_index: 0,
                    updated_at: now,
                });
                if list.next_index >= list.capacity {
                    return Err(StatusListError::Capacity {
                        list_id: list_id.clone(),
                        capacity: list.capacity,
                    });
                }

                let entry = StatusEntry {
                    list_id: list_id.clone(),
                    index: list.next_index,
                    revoked: false,
                    credential_id: credential_id.clone(),
                    updated_at: now,
                };
                list.next_index += 1;
                list.updated_at = now;
                state.entries.insert(credential_id.clone(), entry.clone());
                Ok(entry)
            })
            .await
            .inspect_err(|err| {
                if let StatusListError::Capacity { capacity, .. } = err {
                    warn!(list_id = %list_id, capacity, "status list exhausted");
                }
            })?;

        debug!(
            credential_id = %credential_id,
            list_id = %entry.list_id,
            index = entry.index,
            "credential registered in status list"
        );
        Ok(entry)
    }

    /// Registers a credential in the default list.
    ///
    /// # Errors
    ///
    /// See [`register_credential`](Self::register_credential).
    pub async fn register_default(&self, credential_id: &CredentialId) -> Result<StatusEntry> {
        self.register_credential(credential_id, &ListId::default()).await
    }

    /// Marks a credential revoked.
    ///
    /// Returns `None` for unknown credentials. Revoking twice keeps the first
    /// revocation timestamp.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot write fails.
    pub async fn revoke(&self, credential_id: &CredentialId) -> Result<Option<StatusEntry>> {
        let known = self
            .state
            .read(|state| state.entries.get(credential_id).map(|entry| entry.revoked))
            .await?;
        match known {
            None => return Ok(None),
            Some(true) => return self.entry(credential_id).await,
            Some(false) => {},
        }

        let now = self.clock.now_utc();
        let entry = self
            .state
            .mutate(|state| {
                let Some(entry) = state.entries.get_mut(credential_id) else {
                    return Ok::<_, StatusListError>(None);
                };
                if !entry.revoked {
                    entry.revoked = true;
                    entry.updated_at = now;
                    if let Some(list) = state.lists.get_mut(&entry.list_id) {
                        list.updated_at = now;
                    }
                }
                Ok(Some(entry.clone()))
            })
            .await?;

        if let Some(entry) = &entry {
            info!(
                credential_id = %credential_id,
                list_id = %entry.list_id,
                index = entry.index,
                "credential revoked"
            );
        }
        Ok(entry)
    }

    /// Current status entry for a credential.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn entry(&self, credential_id: &CredentialId) -> Result<Option<StatusEntry>> {
        Ok(self.state.read(|state| state.entries.get(credential_id).cloned()).await?)
    }

    /// Whether a credential is revoked. Unknown credentials are not.
    ///
    /// # Errors
    ///
    /// Returns error if hydration fails.
    pub async fn is_revoked(&self, credential_id: &CredentialId) -> Result<bool> {
        Ok(self.entry(credential_id).await?.is_some_and(|entry| entry.revoked))
    }

    /// Packs the list's revocation bits for publication.
    ///
    /// # Errors
    ///
    /// Returns `StatusListError::NotFound` if the list was never created.
    pub async fn materialize_list(&self, list_id: &ListId) -> Result<StatusListPublication> {
        let publication = self
            .state
            .read(|state| {
                let list = state.lists.get(list_id)?;

                let mut bytes = bitstring::allocate(list.capacity);
                let mut revoked_count = 0;
                for entry in state.entries.values() {
                    if entry.revoked && entry.list_id == *list_id {
                        bitstring::set_bit(&mut bytes, entry.index);
                        revoked_count += 1;
                    }
                }

                Some(StatusListPublication {
                    id: list_id.clone(),
                    bitstring: bitstring::encode(&bytes),
                    size: list.capacity,
                    revoked_count,
                    digest: bitstring::digest(&bytes),
                    updated_at: list.updated_at,
                })
            })
            .await?
            .ok_or_else(|| StatusListError::NotFound { list_id: list_id.clone() })?;

        debug!(
            list_id = %list_id,
            revoked_count = publication.revoked_count,
            digest = %publication.digest,
            "status list materialized"
        );
        Ok(publication)
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{MemorySnapshotStore, TestClock};

    use super::*;

    fn status_list(capacity: usize) -> (RevocationStatusList, TestClock) {
        let clock = TestClock::new();
        let list = RevocationStatusList::new(
            Arc::new(MemorySnapshotStore::new()),
            StatusListConfig { default_capacity: capacity },
            Arc::new(clock.clone()),
        );
        (list, clock)
    }

    #[tokio::test]
    async fn re_registration_returns_existing_entry() {
        let (list, _) = status_list(8);
        let credential = CredentialId::from("cred-1");

        let first = list.register_default(&credential).await.unwrap();
        let second = list.register_default(&credential).await.unwrap();
        let other = list.register_default(&CredentialId::from("cred-2")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(other.index, 1);
    }

    #[tokio::test]
    async fn revoke_unknown_credential_is_noop() {
        let (list, _) = status_list(8);

        assert_eq!(list.revoke(&CredentialId::from("ghost")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_revocation_keeps_first_timestamp() {
        let (list, clock) = status_list(8);
        let credential = CredentialId::from("cred-1");
        list.register_default(&credential).await.unwrap();

        let first = list.revoke(&credential).await.unwrap().unwrap();
        clock.advance(std::time::Duration::from_secs(60));
        let second = list.revoke(&credential).await.unwrap().unwrap();

        assert!(first.revoked);
        assert_eq!(first.updated_at, second.updated_at);
        assert!(list.is_revoked(&credential).await.unwrap());
    }

    #[tokio::test]
    async fn materialize_unknown_list_is_not_found() {
        let (list, _) = status_list(8);

        let err = list.materialize_list(&ListId::from("missing")).await.unwrap_err();
        assert!(matches!(err, StatusListError::NotFound { .. }));
    }

    #[tokio::test]
    async fn provision_rejects_conflicting_capacity() {
        let (list, _) = status_list(8);
        let list_id = ListId::from("tenant-a");

        list.provision_list(&list_id, 16).await.unwrap();
        list.provision_list(&list_id, 16).await.unwrap();

        assert!(list.provision_list(&list_id, 32).await.unwrap_err().is_client_error());
        assert!(list.provision_list(&ListId::from("zero"), 0).await.is_err());
    }
}
