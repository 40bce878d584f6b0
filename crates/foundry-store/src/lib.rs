//! Storage backends for the foundry ingestion pipeline.
//!
//! Implements the `foundry-core` capability traits two ways: fully in-memory
//! (tests, offline and single-process runs) and with batch state durably on
//! disk as JSON files. Entity and blob storage stay in memory in both
//! arrangements; the durable piece is the BatchState, which is what crash
//! recovery replays.

pub mod json;
pub mod memory;

pub use json::JsonStateStore;
pub use memory::{MemoryBlobStore, MemoryEntityStore, MemoryStateStore};

use foundry_core::{BlobStore, EntityStore, StateStore, StoreResult};
use std::path::PathBuf;
use std::sync::Arc;

pub fn create_memory_entity_store() -> Arc<dyn EntityStore> {
    Arc::new(MemoryEntityStore::new())
}

pub fn create_memory_blob_store() -> Arc<dyn BlobStore> {
    Arc::new(MemoryBlobStore::new())
}

pub fn create_memory_state_store() -> Arc<dyn StateStore> {
    Arc::new(MemoryStateStore::new())
}

/// Durable JSON state store rooted at `dir` (created if missing).
pub fn create_json_state_store(dir: impl Into<PathBuf>) -> StoreResult<Arc<dyn StateStore>> {
    Ok(Arc::new(JsonStateStore::new(dir)?))
}
