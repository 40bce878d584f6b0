//! Per-node phase execution.
//!
//! Each phase body receives an immutable snapshot of the batch plus the
//! shared stores and analyzers, and returns the node mutations for the tick
//! loop to apply and persist. Bodies tolerate replay: re-running a node
//! whose work already committed adopts the committed result instead of
//! failing, so a crash between a store write and the completion-flag save
//! cannot wedge a batch.

mod description;
mod discovery;
mod linking;
mod metadata;
mod ocr;
mod reorganize;

use std::sync::Arc;

use anyhow::{Context, Result};
use foundry_core::analyzer::{AnalyzerSuite, DocumentSample};
use foundry_core::batch::{BatchState, FileEntry, NodeState, Phase, PublishedEntity};
use foundry_core::config::PipelineConfig;
use foundry_core::content::ContentAddress;
use foundry_core::entity::{Entity, EntityId};
use foundry_core::records::ReferenceRecord;
use foundry_core::store::{update_with_retry, BlobStore, EntityStore, StateStore, StoreError};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Characters of a document carried into analyzer requests.
const EXCERPT_CHARS: usize = 512;

/// Shared dependencies for tick execution and phase bodies.
#[derive(Clone)]
pub struct PhaseContext {
    pub entities: Arc<dyn EntityStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub states: Arc<dyn StateStore>,
    pub analyzers: AnalyzerSuite,
    pub config: PipelineConfig,
}

/// Node mutations produced by one phase execution, applied by the tick loop.
#[derive(Debug)]
pub struct NodeUpdate {
    pub path: String,
    /// New entity version to record on the node, when the phase published.
    pub published: Option<PublishedEntity>,
    /// Child nodes created by reorganization.
    pub new_children: Vec<NodeState>,
}

impl NodeUpdate {
    fn completed(path: &str) -> Self {
        Self {
            path: path.to_string(),
            published: None,
            new_children: Vec::new(),
        }
    }

    fn published(path: &str, id: EntityId, version: u64) -> Self {
        Self {
            path: path.to_string(),
            published: Some(PublishedEntity { id, version }),
            new_children: Vec::new(),
        }
    }
}

/// Run `phase` against one node. Phases the node's configuration disables,
/// and every phase after a discovery that never published, complete without
/// side effects.
pub(crate) async fn execute(
    phase: Phase,
    path: &str,
    snapshot: &BatchState,
    ctx: &PhaseContext,
) -> Result<NodeUpdate> {
    let node = snapshot
        .node(path)
        .with_context(|| format!("node {path} missing from batch state"))?;
    let published = node.entity.is_some();

    match phase {
        Phase::Discovery => discovery::run(node, snapshot, ctx).await,
        Phase::Ocr if published && node.config.enables(phase) => ocr::run(node, ctx).await,
        Phase::Reorganization if published && reorganize::wanted(node, &ctx.config) => {
            reorganize::run(node, snapshot, ctx).await
        }
        Phase::Metadata if published && node.config.enables(phase) => {
            metadata::run(node, snapshot, ctx).await
        }
        Phase::Linking if published && node.config.enables(phase) => {
            linking::run(node, snapshot, ctx).await
        }
        Phase::Description if published && node.config.enables(phase) => {
            description::run(node, snapshot, ctx).await
        }
        _ => Ok(NodeUpdate::completed(path)),
    }
}

/// Files represented by a reference record rather than chunkable text:
/// binary content, and text uploads whose bytes were never stored.
pub(crate) fn is_reference(entry: &FileEntry) -> bool {
    !entry.is_text() || entry.content_address.is_none()
}

/// Create an entity, or adopt the stored one when a crash after the create
/// already committed it.
pub(crate) async fn create_or_adopt(
    entities: &Arc<dyn EntityStore>,
    entity: Entity,
) -> Result<Entity> {
    let id = entity.id.clone();
    match entities.create(entity).await {
        Ok(stored) => Ok(stored),
        Err(StoreError::AlreadyExists(_)) => {
            let existing = entities
                .get(&id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            debug!(entity = %id, version = existing.version, "adopting already-published entity");
            Ok(existing)
        }
        Err(err) => Err(err.into()),
    }
}

/// Payloads of the named component across the node's children, in child-path
/// order. Children that were skipped or never published contribute nothing.
pub(crate) async fn child_components(
    node: &NodeState,
    snapshot: &BatchState,
    name: &str,
    ctx: &PhaseContext,
) -> Result<Vec<Vec<u8>>> {
    let mut payloads = Vec::new();
    for child_path in &node.children {
        let Some(child) = snapshot.node(child_path) else {
            continue;
        };
        let Some(published) = child.entity.as_ref() else {
            continue;
        };
        let Some(entity) = ctx.entities.get(&published.id).await? else {
            continue;
        };
        let Some(&address) = entity.component(name) else {
            continue;
        };
        let Some(bytes) = ctx.blobs.get(&address).await? else {
            continue;
        };
        payloads.push(bytes);
    }
    Ok(payloads)
}

/// Attach `address` as component `name` of the collection and return the
/// republished version. When the head already carries that exact address the
/// write is skipped, so a replayed node settles on the version the first run
/// produced.
pub(crate) async fn attach_component(
    collection_id: &EntityId,
    name: &'static str,
    address: ContentAddress,
    ctx: &PhaseContext,
) -> Result<u64> {
    let head = ctx
        .entities
        .get(collection_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(collection_id.clone()))?;
    if head.component(name) == Some(&address) {
        return Ok(head.version);
    }
    let stored = update_with_retry(ctx.entities.as_ref(), collection_id, move |entity| {
        entity.set_component(name, address);
        Ok(())
    })
    .await?;
    Ok(stored.version)
}

/// Load and deserialize a JSON component, `None` when the component or its
/// blob is absent.
pub(crate) async fn load_component<T: DeserializeOwned>(
    entity: &Entity,
    name: &str,
    ctx: &PhaseContext,
) -> Result<Option<T>> {
    let Some(address) = entity.component(name) else {
        return Ok(None);
    };
    let Some(bytes) = ctx.blobs.get(address).await? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("component {name} of {}", entity.id))?;
    Ok(Some(value))
}

/// Bounded text samples for the aggregation analyzers. Chunkable files
/// contribute their leading text, references contribute extracted OCR text,
/// files with no readable text are left out.
pub(crate) async fn collect_samples(
    node: &NodeState,
    ctx: &PhaseContext,
) -> Result<Vec<DocumentSample>> {
    let Some(published) = node.entity.as_ref() else {
        return Ok(Vec::new());
    };
    let collection = ctx
        .entities
        .get(&published.id)
        .await?
        .ok_or_else(|| StoreError::NotFound(published.id.clone()))?;

    let mut samples = Vec::new();
    for entry in &node.files {
        let text = if is_reference(entry) {
            reference_text(&collection, entry, ctx).await?
        } else {
            original_text(entry, ctx).await?
        };
        if let Some(text) = text {
            samples.push(DocumentSample {
                filename: entry.filename().to_string(),
                excerpt: excerpt(&text),
            });
        }
    }
    Ok(samples)
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

async fn original_text(entry: &FileEntry, ctx: &PhaseContext) -> Result<Option<String>> {
    let Some(address) = entry.content_address else {
        return Ok(None);
    };
    match ctx.blobs.get(&address).await? {
        Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        None => {
            debug!(file = %entry.path, %address, "original content missing, skipping sample");
            Ok(None)
        }
    }
}

/// A reference file's filename component addresses its ReferenceRecord, on
/// the original collection and on any reorganized child that shares the
/// file. Reading through it picks up whatever text a prior OCR pass stored.
async fn reference_text(
    collection: &Entity,
    entry: &FileEntry,
    ctx: &PhaseContext,
) -> Result<Option<String>> {
    let Some(record) =
        load_component::<ReferenceRecord>(collection, entry.filename(), ctx).await?
    else {
        return Ok(None);
    };
    Ok(record.ocr_text)
}
