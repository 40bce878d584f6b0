//! Linking: detect cross-references between the node's documents, carrying
//! the links its children already extracted, and attach the list as a
//! component.

use anyhow::{Context, Result};
use foundry_core::analyzer::{DocumentLink, LinkRequest};
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

    let documents = collect_samples(node, ctx).await?;
    let mut child_links: Vec<DocumentLink> = Vec::new();
    for bytes in child_components(node, snapshot, component::LINKS, ctx).await? {
        let links: Vec<DocumentLink> = serde_json::from_slice(&bytes)
            .with_context(|| format!("child links under {}", node.path))?;
        child_links.extend(links);
    }
    let response = ctx
        .analyzers
        .links
        .extract_links(LinkRequest {
            path: node.path.clone(),
            documents,
            child_links,
        })
        .await
        .with_context(|| format!("link extraction for {}", node.path))?;

    let address = ctx
        .blobs
        .put(&serde_json::to_vec(&response.links)?)
        .await?;
    let version = attach_component(&collection_id, component::LINKS, address, ctx)
        .await
        .with_context(|| format!("republishing {} with links", node.path))?;

    Ok(NodeUpdate::published(&node.path, collection_id, version))
}
