//! Addressed record payloads: chunk manifests, file records, reference records.
//!
//! These are the JSON documents stored behind component addresses on published
//! entities. All maps are `BTreeMap` so a record's serialized bytes (and
//! therefore its content-address) are stable for the same logical content.

use crate::config::ChunkerConfig;
use crate::content::ContentAddress;
use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version of `ChunksManifest`.
pub const MANIFEST_VERSION: u32 = 1;

/// Algorithm tag recorded in manifests produced by the splitter.
pub const CHUNK_ALGORITHM: &str = "recursive-separator";

/// Chunking configuration as recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_chunks: Option<usize>,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub overlap: usize,
}

impl From<&ChunkerConfig> for ManifestConfig {
    fn from(config: &ChunkerConfig) -> Self {
        Self {
            algorithm: CHUNK_ALGORITHM.to_string(),
            target_chunks: Some(config.target_chunks),
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            overlap: config.overlap,
        }
    }
}

/// One chunk of one file: identifier, stored address, and character range
/// into the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub address: ContentAddress,
    pub char_start: usize,
    pub char_end: usize,
    pub char_count: usize,
}

impl ChunkRecord {
    pub fn new(index: usize, address: ContentAddress, char_start: usize, char_end: usize) -> Self {
        Self {
            id: format!("chunk_{index}"),
            address,
            char_start,
            char_end,
            char_count: char_end - char_start,
        }
    }
}

/// Chunk listing for one file within a manifest.
///
/// A file shorter than the minimum chunk size keeps an empty `chunks` list and
/// is always served whole via `original_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunks {
    pub original_address: ContentAddress,
    pub total_chars: usize,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
}

impl FileChunks {
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }
}

/// Per-collection chunking manifest, stored behind the `chunks_manifest`
/// component. Authoritative once present: a filename missing from it is
/// treated as unknown, not as unchunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunksManifest {
    pub version: u32,
    pub config: ManifestConfig,
    #[serde(default)]
    pub files: BTreeMap<String, FileChunks>,
}

impl ChunksManifest {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            version: MANIFEST_VERSION,
            config: ManifestConfig::from(config),
            files: BTreeMap::new(),
        }
    }

    pub fn insert_file(&mut self, filename: impl Into<String>, chunks: FileChunks) {
        self.files.insert(filename.into(), chunks);
    }

    pub fn file(&self, filename: &str) -> Option<&FileChunks> {
        self.files.get(filename)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Entry in a collection's `file_records` component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecordEntry {
    pub file_entity_id: EntityId,
    pub content_address: ContentAddress,
}

/// Filename to file-entity mapping stored behind the `file_records` component.
pub type FileRecords = BTreeMap<String, FileRecordEntry>;

/// Lightweight stand-in for a binary asset, stored behind the file entity's
/// `reference` component and, on the parent collection, behind the filename
/// component itself. Written during discovery, extended with `ocr_text`
/// during the OCR phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub external_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_address: Option<ContentAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
}

impl ReferenceRecord {
    pub fn needs_ocr(&self) -> bool {
        self.ocr_text.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> ChunksManifest {
        let config = ChunkerConfig::default();
        let mut manifest = ChunksManifest::new(&config);
        manifest.insert_file(
            "report.txt",
            FileChunks {
                original_address: ContentAddress::for_text("full text"),
                total_chars: 9,
                chunks: vec![
                    ChunkRecord::new(0, ContentAddress::for_text("full "), 0, 5),
                    ChunkRecord::new(1, ContentAddress::for_text("text"), 5, 9),
                ],
            },
        );
        manifest
    }

    #[test]
    fn test_chunk_record_derives_count() {
        let record = ChunkRecord::new(3, ContentAddress::for_text("abc"), 100, 130);
        assert_eq!(record.id, "chunk_3");
        assert_eq!(record.char_count, 30);
    }

    #[test]
    fn test_manifest_lookup() {
        let manifest = sample_manifest();
        let file = manifest.file("report.txt").unwrap();
        assert_eq!(file.chunks.len(), 2);
        assert!(file.chunk("chunk_1").is_some());
        assert!(file.chunk("chunk_9").is_none());
        assert!(manifest.file("missing.txt").is_none());
    }

    #[test]
    fn test_manifest_records_config() {
        let manifest = sample_manifest();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.config.algorithm, CHUNK_ALGORITHM);
        assert_eq!(manifest.config.target_chunks, Some(50));
        assert_eq!(manifest.config.overlap, 200);
    }

    #[test]
    fn test_manifest_serde_round_trip() {
        let manifest = sample_manifest();
        let json = serde_json::to_string(&manifest).unwrap();
        let back: ChunksManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_manifest_serialization_is_stable() {
        // Same logical content must produce identical bytes, and therefore an
        // identical content-address.
        let a = serde_json::to_vec(&sample_manifest()).unwrap();
        let b = serde_json::to_vec(&sample_manifest()).unwrap();
        assert_eq!(ContentAddress::for_bytes(&a), ContentAddress::for_bytes(&b));
    }

    #[test]
    fn test_reference_record_ocr_state() {
        let mut record = ReferenceRecord {
            filename: "scan.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 2048,
            external_url: "https://assets.example/scan.png".to_string(),
            original_address: None,
            ocr_text: None,
        };
        assert!(record.needs_ocr());

        record.ocr_text = Some("extracted".to_string());
        assert!(!record.needs_ocr());
    }
}
