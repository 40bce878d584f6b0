//! Storage capability traits and the CAS update protocol.
//!
//! Three seams, all implemented elsewhere and injected as `Arc<dyn …>`:
//! `EntityStore` (versioned records with compare-and-swap updates),
//! `BlobStore` (content-addressed bytes), and `StateStore` (durable batch
//! state). The version check is the only concurrency control in the system;
//! callers that lose a race re-read and re-apply via [`update_with_retry`].

use crate::batch::BatchState;
use crate::content::ContentAddress;
use crate::entity::{Entity, EntityId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type StoreResult<T> = Result<T, StoreError>;

/// How many times a read-modify-write loop re-runs on version conflicts
/// before giving up. Exists to turn a livelock into an error, nothing more.
pub const MAX_CAS_ATTEMPTS: u32 = 32;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: EntityId,
        expected: u64,
        actual: u64,
    },

    #[error("entity not found: {0}")]
    NotFound(EntityId),

    #[error("entity already exists: {0}")]
    AlreadyExists(EntityId),

    #[error("update of {id} still conflicted after {attempts} attempts")]
    RetriesExhausted { id: EntityId, attempts: u32 },

    #[error("corrupted state: {0}")]
    Corrupted(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn corrupted<S: Into<String>>(message: S) -> Self {
        Self::Corrupted(message.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Conflicts are handled by the CAS loop; I/O may heal on the next tick.
    /// Everything else is not worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Io(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// Entity store
// ============================================================================

/// Versioned record store with optimistic concurrency.
///
/// Writes that set `parent` oblige the store to add the entity to the
/// parent's child set in the same operation (when the parent exists), so
/// bidirectional linkage can never drift apart through caller mistakes.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Publish version 1. Fails with `AlreadyExists` for a known identifier.
    async fn create(&self, entity: Entity) -> StoreResult<Entity>;

    /// Compare-and-swap: accepted only when the stored head version equals
    /// `expected_version`; the stored result carries `expected_version + 1`.
    async fn update(&self, entity: Entity, expected_version: u64) -> StoreResult<Entity>;

    /// Latest version, or `None` for an unknown identifier.
    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>>;

    /// A specific historical version. Versions are immutable once written.
    async fn get_version(&self, id: &EntityId, version: u64) -> StoreResult<Option<Entity>>;

    /// Latest version number, without fetching the record.
    async fn head(&self, id: &EntityId) -> StoreResult<Option<u64>>;
}

#[async_trait]
impl<T: EntityStore + ?Sized> EntityStore for Arc<T> {
    async fn create(&self, entity: Entity) -> StoreResult<Entity> {
        (**self).create(entity).await
    }

    async fn update(&self, entity: Entity, expected_version: u64) -> StoreResult<Entity> {
        (**self).update(entity, expected_version).await
    }

    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        (**self).get(id).await
    }

    async fn get_version(&self, id: &EntityId, version: u64) -> StoreResult<Option<Entity>> {
        (**self).get_version(id, version).await
    }

    async fn head(&self, id: &EntityId) -> StoreResult<Option<u64>> {
        (**self).head(id).await
    }
}

/// Read-modify-write loop over the CAS protocol.
///
/// Loads the latest version, applies `mutate`, and writes with the observed
/// version; on conflict the whole cycle re-runs against the fresh record, so
/// `mutate` must be safe to apply more than once. Conflicts never escape this
/// function short of [`MAX_CAS_ATTEMPTS`] consecutive losses.
pub async fn update_with_retry<S, F>(store: &S, id: &EntityId, mut mutate: F) -> StoreResult<Entity>
where
    S: EntityStore + ?Sized,
    F: FnMut(&mut Entity) -> StoreResult<()> + Send,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let mut entity = store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let observed = entity.version;
        mutate(&mut entity)?;

        match store.update(entity, observed).await {
            Ok(stored) => return Ok(stored),
            Err(err) if err.is_conflict() => {
                debug!(entity = %id, attempt, "CAS conflict, re-reading");
                continue;
            }
            Err(err) => return Err(err),
        }
    }
    Err(StoreError::RetriesExhausted {
        id: id.clone(),
        attempts: MAX_CAS_ATTEMPTS,
    })
}

// ============================================================================
// Blob store
// ============================================================================

/// Content-addressed byte storage. `put` is idempotent by construction:
/// identical bytes land at the identical address.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8]) -> StoreResult<ContentAddress>;

    async fn get(&self, address: &ContentAddress) -> StoreResult<Option<Vec<u8>>>;

    async fn contains(&self, address: &ContentAddress) -> StoreResult<bool>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put(&self, bytes: &[u8]) -> StoreResult<ContentAddress> {
        (**self).put(bytes).await
    }

    async fn get(&self, address: &ContentAddress) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(address).await
    }

    async fn contains(&self, address: &ContentAddress) -> StoreResult<bool> {
        (**self).contains(address).await
    }
}

// ============================================================================
// State store
// ============================================================================

/// Durable batch-state storage. `save` must be atomic: a crash mid-save
/// leaves either the previous state or the new one, never a torn record.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &BatchState) -> StoreResult<()>;

    async fn load(&self, batch_id: &str) -> StoreResult<Option<BatchState>>;

    async fn delete(&self, batch_id: &str) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn save(&self, state: &BatchState) -> StoreResult<()> {
        (**self).save(state).await
    }

    async fn load(&self, batch_id: &str) -> StoreResult<Option<BatchState>> {
        (**self).load(batch_id).await
    }

    async fn delete(&self, batch_id: &str) -> StoreResult<()> {
        (**self).delete(batch_id).await
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        (**self).list().await
    }
}
