//! Core domain types and capability traits for the foundry ingestion pipeline.
//!
//! This crate holds everything the other crates share: content addressing,
//! entity records, the chunk address grammar, batch/phase state, storage and
//! analyzer traits, and configuration. It performs no I/O of its own;
//! implementations live in `foundry-store`, `foundry-analyzers`, and
//! `foundry-pipeline` and are injected at the trait seams defined here.

pub mod address;
pub mod analyzer;
pub mod batch;
pub mod config;
pub mod content;
pub mod entity;
pub mod records;
pub mod store;

pub use address::{AddressError, ChunkAddress};
pub use analyzer::{
    AnalyzerError, AnalyzerResult, AnalyzerSuite, Describer, DescribeRequest, DescribeResponse,
    DocumentLink, DocumentSample, FileGroup, LinkAnalyzer, LinkRequest, LinkResponse,
    MetadataAnalyzer, MetadataRequest, MetadataResponse, OcrAnalyzer, OcrRequest, OcrResponse,
    OrganizeRequest, OrganizeResponse, Organizer,
};
pub use batch::{
    BatchFailure, BatchState, BatchStatus, DirectoryGroup, FileEntry, NodeFailure, NodeState,
    Phase, PhaseCounts, ProcessingConfig, PublishedEntity, QueueMessage,
};
pub use config::{default_separators, ChunkerConfig, ConfigError, PipelineConfig};
pub use content::{ContentAddress, ContentAddressError};
pub use entity::{component, Entity, EntityId, EntityKind, FileProperties};
pub use records::{
    ChunkRecord, ChunksManifest, FileChunks, FileRecordEntry, FileRecords, ManifestConfig,
    ReferenceRecord, CHUNK_ALGORITHM, MANIFEST_VERSION,
};
pub use store::{
    update_with_retry, BlobStore, EntityStore, StateStore, StoreError, StoreResult,
    MAX_CAS_ATTEMPTS,
};
