//! Metadata: run the metadata analyzer over the node's document samples plus
//! the metadata its children already published, and attach the result as a
//! component.

use anyhow::{Context, Result};
use foundry_core::analyzer::MetadataRequest;
use foundry_core::batch::{BatchState, NodeState};
use foundry_core::entity::component;
use foundry_core::store::BlobStore;

use super::{attach_component, child_components, collect_samples, NodeUpdate, PhaseContext};

pub(crate) async fn run(
    node: &NodeState,
    snapshot: &BatchState,
    ctx: &PhaseContext,
) -> Result<NodeUpdate> {
    let Some(published) = node.entity.as_ref() else {
        return Ok(NodeUpdate::completed(&node.path));
    };
    let collection_id = published.id.clone();

    let samples = collect_samples(node, ctx).await?;
    let mut child_metadata = Vec::new();
    for bytes in child_components(node, snapshot, component::METADATA, ctx).await? {
        child_metadata.push(
            serde_json::from_slice(&bytes)
                .with_context(|| format!("child metadata under {}", node.path))?,
        );
    }
    let response = ctx
        .analyzers
        .metadata
        .extract_metadata(MetadataRequest {
            path: node.path.clone(),
            samples,
            child_metadata,
        })
        .await
        .with_context(|| format!("metadata extraction for {}", node.path))?;

    let address = ctx
        .blobs
        .put(&serde_json::to_vec(&response.metadata)?)
        .await?;
    let version = attach_component(&collection_id, component::METADATA, address, ctx)
        .await
        .with_context(|| format!("republishing {} with metadata", node.path))?;

    Ok(NodeUpdate::published(&node.path, collection_id, version))
}
