//! OCR: extract text for reference records that still lack it, then point
//! the collection's filename components at the updated records.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use foundry_core::analyzer::OcrRequest;
use foundry_core::batch::NodeState;
use foundry_core::content::ContentAddress;
use foundry_core::entity::{component, EntityId};
use foundry_core::records::ReferenceRecord;
use foundry_core::store::{update_with_retry, BlobStore, EntityStore, StoreError};
use tracing::debug;

use super::{is_reference, NodeUpdate, PhaseContext};

pub(crate) async fn run(node: &NodeState, ctx: &PhaseContext) -> Result<NodeUpdate> {
    let Some(published) = node.entity.as_ref() else {
        return Ok(NodeUpdate::completed(&node.path));
    };
    let collection_id = published.id.clone();

    // Current reference-record address per reference file, extracting text
    // where it is still missing. Records that already carry text are left
    // alone, which makes a replayed node cheap.
    let mut current: BTreeMap<String, ContentAddress> = BTreeMap::new();
    for entry in node.files.iter().filter(|entry| is_reference(entry)) {
        let filename = entry.filename().to_string();
        let file_id = EntityId::for_file(&collection_id, &filename);
        let Some(file_entity) = ctx.entities.get(&file_id).await? else {
            continue;
        };
        let Some(&address) = file_entity.component(component::REFERENCE) else {
            continue;
        };
        let Some(bytes) = ctx.blobs.get(&address).await? else {
            bail!("reference record for {} missing at {address}", entry.path);
        };
        let mut record: ReferenceRecord = serde_json::from_slice(&bytes)
            .with_context(|| format!("reference record for {}", entry.path))?;

        if record.needs_ocr() {
            let response = ctx
                .analyzers
                .ocr
                .extract_text(OcrRequest {
                    filename: record.filename.clone(),
                    content_type: record.mime_type.clone(),
                    external_url: Some(record.external_url.clone()),
                    original_address: record.original_address,
                })
                .await
                .with_context(|| format!("text extraction for {}", entry.path))?;
            record.ocr_text = Some(response.text);
            let updated = ctx.blobs.put(&serde_json::to_vec(&record)?).await?;
            update_with_retry(ctx.entities.as_ref(), &file_id, |entity| {
                entity.set_component(component::REFERENCE, updated);
                Ok(())
            })
            .await
            .with_context(|| format!("republishing file entity for {}", entry.path))?;
            debug!(file = %entry.path, "extracted text into reference record");
            current.insert(filename, updated);
        } else {
            current.insert(filename, address);
        }
    }

    if current.is_empty() {
        return Ok(NodeUpdate::completed(&node.path));
    }

    // The collection's filename components must address the records that now
    // carry text. Skipping the write when nothing moved keeps a replayed
    // node from minting an identical version.
    let collection = ctx
        .entities
        .get(&collection_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(collection_id.clone()))?;
    let stale: BTreeMap<String, ContentAddress> = current
        .into_iter()
        .filter(|(filename, address)| collection.component(filename) != Some(address))
        .collect();
    if stale.is_empty() {
        return Ok(NodeUpdate::published(
            &node.path,
            collection_id,
            collection.version,
        ));
    }

    let stored = update_with_retry(ctx.entities.as_ref(), &collection_id, move |entity| {
        for (filename, address) in &stale {
            entity.set_component(filename.clone(), *address);
        }
        Ok(())
    })
    .await
    .with_context(|| format!("republishing {} after text extraction", node.path))?;

    Ok(NodeUpdate::published(
        &node.path,
        collection_id,
        stored.version,
    ))
}
