//! Shared fixtures for pipeline integration tests: scripted analyzer mocks,
//! in-memory stores, and queue message builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use foundry_core::analyzer::{
    AnalyzerError, AnalyzerResult, AnalyzerSuite, Describer, DescribeRequest, DescribeResponse,
    DocumentLink, FileGroup, LinkAnalyzer, LinkRequest, LinkResponse, MetadataAnalyzer,
    MetadataRequest, MetadataResponse, OcrAnalyzer, OcrRequest, OcrResponse, OrganizeRequest,
    OrganizeResponse, Organizer,
};
use foundry_core::batch::{DirectoryGroup, FileEntry, ProcessingConfig, QueueMessage};
use foundry_core::config::{ChunkerConfig, PipelineConfig};
use foundry_core::store::{BlobStore, EntityStore, StateStore};
use foundry_pipeline::IngestionService;
use foundry_store::{
    create_memory_blob_store, create_memory_entity_store, create_memory_state_store,
};
use serde_json::json;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Call recording and scripted failures
// ============================================================================

/// Ordered record of every analyzer invocation, keyed as `"op:target"`
/// (for example `ocr:scan.png` or `describe:docs/reports`).
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, key: &str) {
        self.0.lock().unwrap().push(key.to_string());
    }

    pub fn count(&self, key: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub fn total(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Copy)]
pub enum FailureMode {
    /// Fail with a retryable error this many times, then succeed.
    /// `u32::MAX` means fail every attempt.
    Unavailable(u32),
    /// Fail every attempt with a non-retryable rejection.
    Rejected,
}

/// Scripted analyzer failures, keyed the same way as [`CallLog`].
#[derive(Clone, Default)]
pub struct FailPlan(Arc<Mutex<HashMap<String, FailureMode>>>);

impl FailPlan {
    pub fn set(&self, key: &str, mode: FailureMode) {
        self.0.lock().unwrap().insert(key.to_string(), mode);
    }

    fn take_failure(&self, key: &str) -> Option<AnalyzerError> {
        let mut plan = self.0.lock().unwrap();
        match plan.get(key).copied()? {
            FailureMode::Rejected => {
                Some(AnalyzerError::Rejected(format!("scripted rejection for {key}")))
            }
            FailureMode::Unavailable(remaining) if remaining > 0 => {
                plan.insert(key.to_string(), FailureMode::Unavailable(remaining - 1));
                Some(AnalyzerError::unavailable(format!("scripted outage for {key}")))
            }
            FailureMode::Unavailable(_) => {
                plan.remove(key);
                None
            }
        }
    }
}

/// Groupings the mock organizer proposes, keyed by directory path.
#[derive(Clone, Default)]
pub struct GroupPlan(Arc<Mutex<HashMap<String, Vec<FileGroup>>>>);

impl GroupPlan {
    pub fn set(&self, path: &str, groups: Vec<(&str, Vec<&str>)>) {
        let groups = groups
            .into_iter()
            .map(|(name, files)| FileGroup {
                name: name.to_string(),
                files: files.into_iter().map(String::from).collect(),
            })
            .collect();
        self.0.lock().unwrap().insert(path.to_string(), groups);
    }

    fn get(&self, path: &str) -> Vec<FileGroup> {
        self.0.lock().unwrap().get(path).cloned().unwrap_or_default()
    }
}

// ============================================================================
// Mock analyzers
// ============================================================================

#[derive(Clone)]
struct MockAnalyzer {
    calls: CallLog,
    failures: FailPlan,
    groups: GroupPlan,
}

impl MockAnalyzer {
    fn check(&self, key: &str) -> AnalyzerResult<()> {
        self.calls.record(key);
        match self.failures.take_failure(key) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OcrAnalyzer for MockAnalyzer {
    async fn extract_text(&self, request: OcrRequest) -> AnalyzerResult<OcrResponse> {
        self.check(&format!("ocr:{}", request.filename))?;
        Ok(OcrResponse {
            text: format!("recognized text of {}", request.filename),
        })
    }
}

#[async_trait]
impl MetadataAnalyzer for MockAnalyzer {
    async fn extract_metadata(&self, request: MetadataRequest) -> AnalyzerResult<MetadataResponse> {
        self.check(&format!("metadata:{}", request.path))?;
        Ok(MetadataResponse {
            metadata: json!({
                "path": request.path,
                "documents": request.samples.len(),
                "children": request.child_metadata.len(),
            }),
        })
    }
}

#[async_trait]
impl Organizer for MockAnalyzer {
    async fn organize(&self, request: OrganizeRequest) -> AnalyzerResult<OrganizeResponse> {
        self.check(&format!("organize:{}", request.path))?;
        Ok(OrganizeResponse {
            groups: self.groups.get(&request.path),
        })
    }
}

#[async_trait]
impl LinkAnalyzer for MockAnalyzer {
    async fn extract_links(&self, request: LinkRequest) -> AnalyzerResult<LinkResponse> {
        self.check(&format!("links:{}", request.path))?;
        let mut links: Vec<DocumentLink> = request
            .documents
            .windows(2)
            .map(|pair| DocumentLink {
                from: pair[0].filename.clone(),
                to: pair[1].filename.clone(),
                kind: "related".to_string(),
            })
            .collect();
        links.extend(request.child_links);
        Ok(LinkResponse { links })
    }
}

#[async_trait]
impl Describer for MockAnalyzer {
    async fn describe(&self, request: DescribeRequest) -> AnalyzerResult<DescribeResponse> {
        self.check(&format!("describe:{}", request.path))?;
        Ok(DescribeResponse {
            description: format!(
                "description of {} covering {} children",
                request.path,
                request.child_descriptions.len()
            ),
        })
    }
}

// ============================================================================
// Environment
// ============================================================================

pub struct TestEnv {
    pub entities: Arc<dyn EntityStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub states: Arc<dyn StateStore>,
    pub calls: CallLog,
    pub failures: FailPlan,
    pub groups: GroupPlan,
    pub suite: AnalyzerSuite,
    pub service: IngestionService,
}

impl TestEnv {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_states(config, create_memory_state_store())
    }

    pub fn with_states(config: PipelineConfig, states: Arc<dyn StateStore>) -> Self {
        init_test_logging();
        let entities = create_memory_entity_store();
        let blobs = create_memory_blob_store();
        let calls = CallLog::default();
        let failures = FailPlan::default();
        let groups = GroupPlan::default();
        let mock = MockAnalyzer {
            calls: calls.clone(),
            failures: failures.clone(),
            groups: groups.clone(),
        };
        let suite = AnalyzerSuite {
            ocr: Arc::new(mock.clone()),
            metadata: Arc::new(mock.clone()),
            organizer: Arc::new(mock.clone()),
            links: Arc::new(mock.clone()),
            describer: Arc::new(mock),
        };
        let service = IngestionService::new(
            Arc::clone(&entities),
            Arc::clone(&blobs),
            Arc::clone(&states),
            suite.clone(),
            config,
        )
        .unwrap();
        Self {
            entities,
            blobs,
            states,
            calls,
            failures,
            groups,
            suite,
            service,
        }
    }

    /// A second service over the same stores and mocks, as after a process
    /// restart.
    pub fn restarted_service(&self, config: PipelineConfig) -> IngestionService {
        IngestionService::new(
            Arc::clone(&self.entities),
            Arc::clone(&self.blobs),
            Arc::clone(&self.states),
            self.suite.clone(),
            config,
        )
        .unwrap()
    }

    /// Store `content` as a blob and return the file entry pointing at it.
    pub async fn seed_text_file(&self, path: &str, content: &str) -> FileEntry {
        let address = self.blobs.put(content.as_bytes()).await.unwrap();
        FileEntry {
            path: path.to_string(),
            size: content.len() as u64,
            content_type: "text/plain".to_string(),
            content_address: Some(address),
        }
    }
}

/// A binary upload handled by reference; no stored content.
pub fn binary_file(path: &str, size: u64) -> FileEntry {
    FileEntry {
        path: path.to_string(),
        size,
        content_type: "image/png".to_string(),
        content_address: None,
    }
}

pub fn group(path: &str, files: Vec<FileEntry>) -> DirectoryGroup {
    DirectoryGroup {
        path: path.to_string(),
        config: ProcessingConfig::default(),
        files,
    }
}

pub fn message(batch_id: &str, root_path: &str, groups: Vec<DirectoryGroup>) -> QueueMessage {
    QueueMessage {
        batch_id: batch_id.to_string(),
        root_path: root_path.to_string(),
        uploader: "tester".to_string(),
        groups,
    }
}

/// Zero-delay scheduling with a small adaptive chunker, so batches finish in
/// a few ticks and short files still produce multiple chunks.
pub fn quick_config() -> PipelineConfig {
    PipelineConfig {
        tick_interval_ms: 0,
        retry_backoff_ms: 0,
        retry_jitter_ms: 0,
        max_retries: 2,
        reorganize_threshold: 100,
        chunker: ChunkerConfig {
            target_chunks: 4,
            min_chunk_size: 10,
            max_chunk_size: 40,
            overlap: 4,
            ..ChunkerConfig::default()
        },
        ..PipelineConfig::default()
    }
}
