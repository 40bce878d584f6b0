//! Reorganization: split a large directory into analyzer-proposed child
//! collections that share the parent's content addresses.
//!
//! Proposed groups may overlap, and membership costs no storage: a child
//! collection's components, manifest subset, and file-record subset all
//! point at the addresses the parent already published. New child nodes are
//! marked complete through this phase so they join the batch at the same
//! point in the progression as their parent.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use foundry_core::analyzer::OrganizeRequest;
use foundry_core::batch::{BatchState, NodeState, Phase, PublishedEntity};
use foundry_core::config::PipelineConfig;
use foundry_core::entity::{component, Entity, EntityId};
use foundry_core::records::{ChunksManifest, FileChunks, FileRecords};
use foundry_core::store::{BlobStore, EntityStore, StoreError};
use tracing::debug;

use super::{create_or_adopt, load_component, NodeUpdate, PhaseContext};

/// Reorganization runs when a node opts in or its file count reaches the
/// configured threshold.
pub(crate) fn wanted(node: &NodeState, config: &PipelineConfig) -> bool {
    node.config.reorganize || node.files.len() >= config.reorganize_threshold
}

pub(crate) async fn run(
    node: &NodeState,
    snapshot: &BatchState,
    ctx: &PhaseContext,
) -> Result<NodeUpdate> {
    let Some(published) = node.entity.as_ref() else {
        return Ok(NodeUpdate::completed(&node.path));
    };
    let collection_id = published.id.clone();

    let filenames: Vec<String> = node
        .files
        .iter()
        .map(|entry| entry.filename().to_string())
        .collect();
    let response = ctx
        .analyzers
        .organizer
        .organize(OrganizeRequest {
            path: node.path.clone(),
            files: filenames,
        })
        .await
        .with_context(|| format!("organizing {}", node.path))?;
    if response.groups.is_empty() {
        return Ok(NodeUpdate::completed(&node.path));
    }

    let collection = ctx
        .entities
        .get(&collection_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(collection_id.clone()))?;
    let manifest: Option<ChunksManifest> =
        load_component(&collection, component::CHUNKS_MANIFEST, ctx).await?;
    let records: Option<FileRecords> =
        load_component(&collection, component::FILE_RECORDS, ctx).await?;

    let mut new_children: Vec<NodeState> = Vec::new();
    for group in response.groups {
        let name = group.name.trim();
        if name.is_empty() {
            debug!(node = %node.path, "skipping unnamed group");
            continue;
        }
        let members: Vec<_> = node
            .files
            .iter()
            .filter(|entry| group.files.iter().any(|f| f.as_str() == entry.filename()))
            .collect();
        if members.is_empty() {
            debug!(node = %node.path, group = %name, "skipping group with no known files");
            continue;
        }
        let child_path = format!("{}/{}", node.path, name.replace('/', "-"));
        if snapshot.nodes.contains_key(&child_path)
            || new_children.iter().any(|child| child.path == child_path)
        {
            debug!(node = %node.path, child = %child_path, "group path already taken, skipping");
            continue;
        }

        let mut child = NodeState::new(&child_path, node.depth + 1, node.config);
        // A replayed split must find the same identity, not mint a new one.
        child.entity_id = EntityId::for_group(&collection_id, name);
        child.parent = Some(node.path.clone());
        child.files = members.iter().map(|&entry| entry.clone()).collect();
        for phase in Phase::SEQUENCE.iter().filter(|p| **p <= Phase::Reorganization) {
            child.completed.insert(*phase);
        }

        let mut entity =
            Entity::collection(child.entity_id.clone(), name).with_parent(collection_id.clone());
        let mut entity_children = BTreeSet::new();
        for member in &members {
            let filename = member.filename();
            entity_children.insert(EntityId::for_file(&collection_id, filename));
            if let Some(&address) = collection.component(filename) {
                entity.set_component(filename, address);
            }
        }
        entity = entity.with_children(entity_children);

        if let Some(manifest) = &manifest {
            let files: BTreeMap<String, FileChunks> = manifest
                .files
                .iter()
                .filter(|(filename, _)| {
                    members.iter().any(|m| m.filename() == filename.as_str())
                })
                .map(|(filename, chunks)| (filename.clone(), chunks.clone()))
                .collect();
            if !files.is_empty() {
                let subset = ChunksManifest {
                    version: manifest.version,
                    config: manifest.config.clone(),
                    files,
                };
                let address = ctx.blobs.put(&serde_json::to_vec(&subset)?).await?;
                entity.set_component(component::CHUNKS_MANIFEST, address);
            }
        }
        if let Some(records) = &records {
            let subset: FileRecords = records
                .iter()
                .filter(|(filename, _)| {
                    members.iter().any(|m| m.filename() == filename.as_str())
                })
                .map(|(filename, entry)| (filename.clone(), entry.clone()))
                .collect();
            if !subset.is_empty() {
                let address = ctx.blobs.put(&serde_json::to_vec(&subset)?).await?;
                entity.set_component(component::FILE_RECORDS, address);
            }
        }

        let stored = create_or_adopt(&ctx.entities, entity)
            .await
            .with_context(|| format!("publishing reorganized child {child_path}"))?;
        child.set_published(stored.id.clone(), stored.version);
        new_children.push(child);
    }

    if new_children.is_empty() {
        return Ok(NodeUpdate::completed(&node.path));
    }

    // Creating each child bumps the parent through store-side child linkage;
    // an adopted child bumps nothing, so a replayed split lands on the head
    // the first run left behind.
    let version = ctx
        .entities
        .head(&collection_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(collection_id.clone()))?;
    Ok(NodeUpdate {
        path: node.path.clone(),
        published: Some(PublishedEntity {
            id: collection_id,
            version,
        }),
        new_children,
    })
}
