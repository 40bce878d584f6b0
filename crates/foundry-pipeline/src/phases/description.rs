//! Description: summarize the node from its own samples plus the
//! descriptions its children produced in earlier ticks.
//!
//! Runs bottom-up, so every settled child that describes itself already has
//! a description component by the time the parent is selected. Children
//! that were skipped or opted out contribute nothing.

use anyhow::{Context, Result};
use foundry_core::analyzer::DescribeRequest;
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
    let child_descriptions: Vec<String> =
        child_components(node, snapshot, component::DESCRIPTION, ctx)
            .await?
            .into_iter()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect();

    let response = ctx
        .analyzers
        .describer
        .describe(DescribeRequest {
            path: node.path.clone(),
            samples,
            child_descriptions,
        })
        .await
        .with_context(|| format!("describing {}", node.path))?;

    let address = ctx.blobs.put(response.description.as_bytes()).await?;
    let version = attach_component(&collection_id, component::DESCRIPTION, address, ctx)
        .await
        .with_context(|| format!("republishing {} with description", node.path))?;

    Ok(NodeUpdate::published(&node.path, collection_id, version))
}
