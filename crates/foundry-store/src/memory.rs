//! In-memory backend implementations.
//!
//! Fast, deterministic, isolated per instance; the pipeline integration tests
//! run entirely on these, and embedding callers can use them for offline or
//! single-process deployments. Interior mutability is a `parking_lot::Mutex`
//! around plain maps; every critical section is short and synchronous.

use async_trait::async_trait;
use chrono::Utc;
use foundry_core::{
    BatchState, BlobStore, ContentAddress, Entity, EntityId, EntityStore, StateStore, StoreError,
    StoreResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory versioned entity store.
///
/// Each entity keeps its full version history (`versions[i]` carries version
/// `i + 1`), so historical reads are lookups, not reconstructions. The parent
/// linkage obligation runs under the same lock as the write that triggers it.
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: Mutex<HashMap<EntityId, Vec<Entity>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct entities, for test assertions.
    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `child` to its parent's child set as a new parent version.
    /// No-op when the child has no parent, the parent is not stored yet
    /// (bottom-up publishing), or the link already exists.
    fn link_parent(entities: &mut HashMap<EntityId, Vec<Entity>>, child: &Entity) {
        let Some(parent_id) = &child.parent else {
            return;
        };
        let Some(versions) = entities.get_mut(parent_id) else {
            return;
        };
        let Some(head) = versions.last() else {
            return;
        };
        if head.children.contains(&child.id) {
            return;
        }
        let mut next = head.clone();
        next.version += 1;
        next.children.insert(child.id.clone());
        next.updated_at = Utc::now();
        versions.push(next);
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create(&self, mut entity: Entity) -> StoreResult<Entity> {
        let mut entities = self.entities.lock();
        if entities.contains_key(&entity.id) {
            return Err(StoreError::AlreadyExists(entity.id));
        }
        entity.version = 1;
        Self::link_parent(&mut entities, &entity);
        entities.insert(entity.id.clone(), vec![entity.clone()]);
        Ok(entity)
    }

    async fn update(&self, mut entity: Entity, expected_version: u64) -> StoreResult<Entity> {
        let mut entities = self.entities.lock();
        {
            let Some(versions) = entities.get_mut(&entity.id) else {
                return Err(StoreError::NotFound(entity.id));
            };
            let actual = versions.last().map(|e| e.version).unwrap_or(0);
            if actual != expected_version {
                return Err(StoreError::Conflict {
                    id: entity.id,
                    expected: expected_version,
                    actual,
                });
            }
            entity.version = expected_version + 1;
            entity.updated_at = Utc::now();
            versions.push(entity.clone());
        }
        Self::link_parent(&mut entities, &entity);
        Ok(entity)
    }

    async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
        Ok(self.entities.lock().get(id).and_then(|v| v.last().cloned()))
    }

    async fn get_version(&self, id: &EntityId, version: u64) -> StoreResult<Option<Entity>> {
        Ok(self
            .entities
            .lock()
            .get(id)
            .and_then(|versions| versions.iter().find(|e| e.version == version).cloned()))
    }

    async fn head(&self, id: &EntityId) -> StoreResult<Option<u64>> {
        Ok(self
            .entities
            .lock()
            .get(id)
            .and_then(|v| v.last())
            .map(|e| e.version))
    }
}

/// In-memory content-addressed blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<ContentAddress, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> StoreResult<ContentAddress> {
        let address = ContentAddress::for_bytes(bytes);
        self.blobs
            .lock()
            .entry(address)
            .or_insert_with(|| bytes.to_vec());
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(address).cloned())
    }

    async fn contains(&self, address: &ContentAddress) -> StoreResult<bool> {
        Ok(self.blobs.lock().contains_key(address))
    }
}

/// In-memory batch state store, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, BatchState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, state: &BatchState) -> StoreResult<()> {
        self.states
            .lock()
            .insert(state.batch_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, batch_id: &str) -> StoreResult<Option<BatchState>> {
        Ok(self.states.lock().get(batch_id).cloned())
    }

    async fn delete(&self, batch_id: &str) -> StoreResult<()> {
        self.states.lock().remove(batch_id);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self.states.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_core::{component, update_with_retry, Entity, FileProperties};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn collection(id: &str) -> Entity {
        Entity::collection(EntityId::from(id), id)
    }

    fn file_under(parent: &EntityId, filename: &str) -> Entity {
        Entity::file(
            parent,
            FileProperties {
                filename: filename.to_string(),
                content_type: "text/plain".to_string(),
                size: 12,
                external_url: None,
                archive_key: None,
            },
        )
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let store = MemoryEntityStore::new();
        let created = store.create(collection("col-1")).await.unwrap();
        assert_eq!(created.version, 1);

        let loaded = store.get(&EntityId::from("col-1")).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(store.head(&loaded.id).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemoryEntityStore::new();
        store.create(collection("col-1")).await.unwrap();

        let err = store.create(collection("col-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_history() {
        let store = MemoryEntityStore::new();
        let v1 = store.create(collection("col-1")).await.unwrap();

        let mut draft = v1.clone();
        draft.set_component(component::DESCRIPTION, ContentAddress::for_text("hello"));
        let v2 = store.update(draft, 1).await.unwrap();
        assert_eq!(v2.version, 2);

        let historical = store.get_version(&v1.id, 1).await.unwrap().unwrap();
        assert!(historical.component(component::DESCRIPTION).is_none());
        let head = store.get(&v1.id).await.unwrap().unwrap();
        assert!(head.component(component::DESCRIPTION).is_some());
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryEntityStore::new();
        let v1 = store.create(collection("col-1")).await.unwrap();
        store.update(v1.clone(), 1).await.unwrap();

        let err = store.update(v1, 1).await.unwrap_err();
        match err {
            StoreError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_of_unknown_entity_is_not_found() {
        let store = MemoryEntityStore::new();
        let err = store.update(collection("ghost"), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_both_land_as_sequential_versions() {
        let store = Arc::new(MemoryEntityStore::new());
        let id = EntityId::from("col-1");
        store.create(collection("col-1")).await.unwrap();

        let left = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                update_with_retry(&store, &id, |entity| {
                    entity.set_component(component::METADATA, ContentAddress::for_text("meta"));
                    Ok(())
                })
                .await
            })
        };
        let right = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                update_with_retry(&store, &id, |entity| {
                    entity.set_component(component::DESCRIPTION, ContentAddress::for_text("desc"));
                    Ok(())
                })
                .await
            })
        };

        left.await.unwrap().unwrap();
        right.await.unwrap().unwrap();

        // Neither write was lost: both components present, versions strictly
        // sequential.
        let head = store.get(&id).await.unwrap().unwrap();
        assert_eq!(head.version, 3);
        assert!(head.component(component::METADATA).is_some());
        assert!(head.component(component::DESCRIPTION).is_some());
    }

    /// Delegating store that loses the first CAS on purpose.
    struct ConflictOnce {
        inner: MemoryEntityStore,
        tripped: Mutex<bool>,
        update_calls: Mutex<u32>,
    }

    #[async_trait]
    impl EntityStore for ConflictOnce {
        async fn create(&self, entity: Entity) -> StoreResult<Entity> {
            self.inner.create(entity).await
        }

        async fn update(&self, entity: Entity, expected_version: u64) -> StoreResult<Entity> {
            *self.update_calls.lock() += 1;
            {
                let mut tripped = self.tripped.lock();
                if !*tripped {
                    *tripped = true;
                    return Err(StoreError::Conflict {
                        id: entity.id,
                        expected: expected_version,
                        actual: expected_version + 1,
                    });
                }
            }
            self.inner.update(entity, expected_version).await
        }

        async fn get(&self, id: &EntityId) -> StoreResult<Option<Entity>> {
            self.inner.get(id).await
        }

        async fn get_version(&self, id: &EntityId, version: u64) -> StoreResult<Option<Entity>> {
            self.inner.get_version(id, version).await
        }

        async fn head(&self, id: &EntityId) -> StoreResult<Option<u64>> {
            self.inner.head(id).await
        }
    }

    #[tokio::test]
    async fn test_update_with_retry_rereads_after_losing_cas() {
        let store = ConflictOnce {
            inner: MemoryEntityStore::new(),
            tripped: Mutex::new(false),
            update_calls: Mutex::new(0),
        };
        let id = EntityId::from("col-1");
        store.create(collection("col-1")).await.unwrap();

        let stored = update_with_retry(&store, &id, |entity| {
            entity.set_component(component::METADATA, ContentAddress::for_text("meta"));
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(stored.version, 2);
        assert_eq!(*store.update_calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_create_with_known_parent_links_child() {
        let store = MemoryEntityStore::new();
        let parent = store.create(collection("parent")).await.unwrap();
        let child = store
            .create(file_under(&parent.id, "doc.txt"))
            .await
            .unwrap();

        let parent_head = store.get(&parent.id).await.unwrap().unwrap();
        assert_eq!(parent_head.version, 2);
        assert!(parent_head.children.contains(&child.id));
        // The original parent version is still readable without the child.
        let parent_v1 = store.get_version(&parent.id, 1).await.unwrap().unwrap();
        assert!(parent_v1.children.is_empty());
    }

    #[tokio::test]
    async fn test_create_with_absent_parent_is_deferred_linkage() {
        let store = MemoryEntityStore::new();
        let parent_id = EntityId::from("parent");
        let child = store
            .create(file_under(&parent_id, "doc.txt"))
            .await
            .unwrap();
        assert_eq!(child.version, 1);

        // Bottom-up publish: the parent arrives later carrying its child set.
        let parent = store
            .create(collection("parent").with_children([child.id.clone()]))
            .await
            .unwrap();
        assert!(parent.children.contains(&child.id));
        assert_eq!(parent.version, 1);
    }

    #[tokio::test]
    async fn test_reparenting_update_links_new_parent() {
        let store = MemoryEntityStore::new();
        let old_parent = store.create(collection("old-parent")).await.unwrap();
        let new_parent = store.create(collection("new-parent")).await.unwrap();
        let child = store
            .create(file_under(&old_parent.id, "doc.txt"))
            .await
            .unwrap();

        let moved = store
            .update(child.clone().with_parent(new_parent.id.clone()), 1)
            .await
            .unwrap();
        assert_eq!(moved.version, 2);

        let new_parent_head = store.get(&new_parent.id).await.unwrap().unwrap();
        assert!(new_parent_head.children.contains(&child.id));
    }

    #[tokio::test]
    async fn test_parent_linkage_conflicts_concurrent_parent_writer() {
        let store = MemoryEntityStore::new();
        let parent = store.create(collection("parent")).await.unwrap();
        store
            .create(file_under(&parent.id, "doc.txt"))
            .await
            .unwrap();

        // The linkage advanced the parent head; a writer still holding the
        // pre-link version must lose the CAS.
        let err = store.update(parent, 1).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_blob_put_is_idempotent() {
        let store = MemoryBlobStore::new();
        let first = store.put(b"same bytes").await.unwrap();
        let second = store.put(b"same bytes").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&first).await.unwrap().as_deref(),
            Some(b"same bytes".as_slice())
        );
        assert!(store.contains(&first).await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_miss_reads_as_none() {
        let store = MemoryBlobStore::new();
        let address = ContentAddress::for_text("never stored");
        assert_eq!(store.get(&address).await.unwrap(), None);
        assert!(!store.contains(&address).await.unwrap());
    }

    #[tokio::test]
    async fn test_state_store_round_trip_and_list() {
        let store = MemoryStateStore::new();
        let beta = BatchState::new("beta", "/root", "tester", BTreeMap::new());
        let alpha = BatchState::new("alpha", "/root", "tester", BTreeMap::new());
        store.save(&beta).await.unwrap();
        store.save(&alpha).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["alpha", "beta"]);
        assert_eq!(store.load("beta").await.unwrap(), Some(beta));

        store.delete("beta").await.unwrap();
        assert_eq!(store.load("beta").await.unwrap(), None);
        assert_eq!(store.list().await.unwrap(), vec!["alpha"]);
    }
}
