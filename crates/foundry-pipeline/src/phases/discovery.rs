//! Discovery: classify each file, chunk readable text, and publish version 1
//! of the node's collection entity.
//!
//! Runs bottom-up, so every child collection already carries a published
//! entity when its parent is selected. File entities are created before the
//! collection so the collection's create carries the complete child set.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use foundry_chunker::chunk_file;
use foundry_core::batch::{BatchState, NodeState};
use foundry_core::content::ContentAddress;
use foundry_core::entity::{component, Entity, FileProperties};
use foundry_core::records::{
    ChunkRecord, ChunksManifest, FileChunks, FileRecordEntry, FileRecords, ReferenceRecord,
};
use foundry_core::store::BlobStore;
use tracing::debug;

use super::{create_or_adopt, is_reference, NodeUpdate, PhaseContext};

pub(crate) async fn run(
    node: &NodeState,
    snapshot: &BatchState,
    ctx: &PhaseContext,
) -> Result<NodeUpdate> {
    let collection_id = node.entity_id.clone();
    let parent_id = node
        .parent
        .as_ref()
        .and_then(|path| snapshot.node(path))
        .map(|parent| parent.entity_id.clone());
    let name = node
        .path
        .rsplit('/')
        .next()
        .unwrap_or(&node.path)
        .to_string();

    let mut manifest = ChunksManifest::new(&ctx.config.chunker);
    let mut file_records = FileRecords::new();
    let mut components: Vec<(String, ContentAddress)> = Vec::new();
    let mut file_entities: Vec<Entity> = Vec::new();

    for entry in &node.files {
        let filename = entry.filename().to_string();
        if is_reference(entry) {
            let record = ReferenceRecord {
                filename: filename.clone(),
                mime_type: entry.content_type.clone(),
                size: entry.size,
                external_url: entry.path.clone(),
                original_address: entry.content_address,
                ocr_text: None,
            };
            let address = ctx
                .blobs
                .put(&serde_json::to_vec(&record)?)
                .await
                .with_context(|| format!("storing reference record for {}", entry.path))?;
            components.push((filename.clone(), address));

            let properties = FileProperties {
                filename: filename.clone(),
                content_type: entry.content_type.clone(),
                size: entry.size,
                external_url: Some(entry.path.clone()),
                archive_key: None,
            };
            let file_entity =
                Entity::file(&collection_id, properties).with_component(component::REFERENCE, address);
            file_records.insert(
                filename,
                FileRecordEntry {
                    file_entity_id: file_entity.id.clone(),
                    content_address: address,
                },
            );
            file_entities.push(file_entity);
        } else {
            let Some(address) = entry.content_address else {
                continue;
            };
            let bytes = ctx
                .blobs
                .get(&address)
                .await?
                .with_context(|| format!("content for {} missing at {address}", entry.path))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let spans = chunk_file(&text, &ctx.config.chunker)
                .with_context(|| format!("chunking {}", entry.path))?;
            debug!(file = %entry.path, chunks = spans.len(), "chunked text file");

            let mut chunks = Vec::with_capacity(spans.len());
            for (index, span) in spans.iter().enumerate() {
                let chunk_address = ctx.blobs.put(span.text.as_bytes()).await?;
                chunks.push(ChunkRecord::new(
                    index,
                    chunk_address,
                    span.char_start,
                    span.char_end,
                ));
            }
            manifest.insert_file(
                filename.clone(),
                FileChunks {
                    original_address: address,
                    total_chars: text.chars().count(),
                    chunks,
                },
            );
            components.push((filename.clone(), address));

            let properties = FileProperties {
                filename: filename.clone(),
                content_type: entry.content_type.clone(),
                size: entry.size,
                external_url: None,
                archive_key: None,
            };
            let file_entity = Entity::file(&collection_id, properties);
            file_records.insert(
                filename,
                FileRecordEntry {
                    file_entity_id: file_entity.id.clone(),
                    content_address: address,
                },
            );
            file_entities.push(file_entity);
        }
    }

    let mut children: BTreeSet<_> = node
        .children
        .iter()
        .filter_map(|path| snapshot.node(path))
        .filter_map(|child| child.entity.as_ref())
        .map(|published| published.id.clone())
        .collect();
    for file_entity in file_entities {
        children.insert(file_entity.id.clone());
        create_or_adopt(&ctx.entities, file_entity).await?;
    }

    let mut entity = Entity::collection(collection_id.clone(), name).with_children(children);
    if let Some(parent_id) = parent_id {
        entity = entity.with_parent(parent_id);
    }
    for (filename, address) in components {
        entity.set_component(filename, address);
    }
    if !manifest.is_empty() {
        let address = ctx.blobs.put(&serde_json::to_vec(&manifest)?).await?;
        entity.set_component(component::CHUNKS_MANIFEST, address);
    }
    if !file_records.is_empty() {
        let address = ctx.blobs.put(&serde_json::to_vec(&file_records)?).await?;
        entity.set_component(component::FILE_RECORDS, address);
    }

    let stored = create_or_adopt(&ctx.entities, entity)
        .await
        .with_context(|| format!("publishing {}", node.path))?;
    Ok(NodeUpdate::published(
        &node.path,
        collection_id,
        stored.version,
    ))
}
