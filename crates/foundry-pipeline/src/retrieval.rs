//! Chunk address resolution against the entity and blob stores.
//!
//! Resolution prefers returning readable bytes over erroring: a chunk
//! address against a collection published before chunking existed, or one
//! naming a chunk the manifest does not list for an otherwise known file,
//! falls back to the file's whole original content. The manifest is
//! authoritative for which files exist once it is present.

use std::sync::Arc;

use foundry_core::address::{AddressError, ChunkAddress};
use foundry_core::content::ContentAddress;
use foundry_core::entity::{component, Entity, EntityId};
use foundry_core::records::ChunksManifest;
use foundry_core::store::{BlobStore, EntityStore, StoreError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("invalid chunk address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("collection not found: {0}")]
    CollectionNotFound(EntityId),

    #[error("file '{filename}' not found in collection {collection}")]
    FileNotFound {
        collection: EntityId,
        filename: String,
    },

    #[error("content missing from blob store at {0}")]
    ContentMissing(ContentAddress),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolve a chunk address to stored bytes.
pub async fn fetch_chunk(
    entities: &Arc<dyn EntityStore>,
    blobs: &Arc<dyn BlobStore>,
    address: &ChunkAddress,
) -> Result<Vec<u8>, RetrievalError> {
    let entity = entities
        .get(&address.collection)
        .await?
        .ok_or_else(|| RetrievalError::CollectionNotFound(address.collection.clone()))?;

    let target = resolve_target(&entity, address, blobs).await?;
    blobs
        .get(&target)
        .await?
        .ok_or(RetrievalError::ContentMissing(target))
}

async fn resolve_target(
    entity: &Entity,
    address: &ChunkAddress,
    blobs: &Arc<dyn BlobStore>,
) -> Result<ContentAddress, RetrievalError> {
    let whole_file = || {
        entity
            .component(&address.filename)
            .copied()
            .ok_or_else(|| RetrievalError::FileNotFound {
                collection: entity.id.clone(),
                filename: address.filename.clone(),
            })
    };

    let Some(chunk_id) = &address.chunk_id else {
        return whole_file();
    };

    let Some(manifest_address) = entity.component(component::CHUNKS_MANIFEST) else {
        // Collection published before it was ever chunked; a chunk address
        // still resolves to the file itself.
        debug!(collection = %entity.id, file = %address.filename, "no chunks manifest, serving whole file");
        return whole_file();
    };
    let bytes = blobs
        .get(manifest_address)
        .await?
        .ok_or(RetrievalError::ContentMissing(*manifest_address))?;
    let manifest: ChunksManifest = serde_json::from_slice(&bytes)
        .map_err(|err| StoreError::corrupted(format!("chunks manifest of {}: {err}", entity.id)))?;

    let Some(file) = manifest.file(&address.filename) else {
        return Err(RetrievalError::FileNotFound {
            collection: entity.id.clone(),
            filename: address.filename.clone(),
        });
    };

    match file.chunk(chunk_id) {
        Some(chunk) => Ok(chunk.address),
        None => {
            debug!(
                collection = %entity.id,
                file = %address.filename,
                chunk = %chunk_id,
                "chunk not in manifest, serving whole original"
            );
            Ok(file.original_address)
        }
    }
}
