//! Batch state: the durable record a coordinator owns for one batch.
//!
//! `BatchState` is everything needed to resume after a crash: the current
//! phase plus, per directory node, completion flags, retry counters, and the
//! published entity version. It is saved through a `StateStore` after every
//! node completion and every phase transition.

use crate::content::ContentAddress;
use crate::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Phases
// ============================================================================

/// Pipeline phases in execution order, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Uploading,
    Chunking,
    Discovery,
    Ocr,
    Reorganization,
    Metadata,
    Linking,
    Description,
    Done,
    Error,
}

impl Phase {
    /// Working phases in order, terminals excluded.
    pub const SEQUENCE: [Phase; 8] = [
        Phase::Uploading,
        Phase::Chunking,
        Phase::Discovery,
        Phase::Ocr,
        Phase::Reorganization,
        Phase::Metadata,
        Phase::Linking,
        Phase::Description,
    ];

    /// The phase that follows this one on success.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Uploading => Some(Phase::Chunking),
            Phase::Chunking => Some(Phase::Discovery),
            Phase::Discovery => Some(Phase::Ocr),
            Phase::Ocr => Some(Phase::Reorganization),
            Phase::Reorganization => Some(Phase::Metadata),
            Phase::Metadata => Some(Phase::Linking),
            Phase::Linking => Some(Phase::Description),
            Phase::Description => Some(Phase::Done),
            Phase::Done | Phase::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }

    /// Phases where a node becomes eligible only after all of its children
    /// have completed the phase.
    pub fn is_bottom_up(self) -> bool {
        matches!(
            self,
            Phase::Discovery | Phase::Metadata | Phase::Linking | Phase::Description
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uploading => "UPLOADING",
            Phase::Chunking => "CHUNKING",
            Phase::Discovery => "DISCOVERY",
            Phase::Ocr => "OCR",
            Phase::Reorganization => "REORGANIZATION",
            Phase::Metadata => "METADATA",
            Phase::Linking => "LINKING",
            Phase::Description => "DESCRIPTION",
            Phase::Done => "DONE",
            Phase::Error => "ERROR",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Input contract
// ============================================================================

/// Per-node switches for the analyzer-driven phases. Inherited by child nodes
/// created during reorganization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub ocr: bool,
    pub reorganize: bool,
    pub metadata: bool,
    pub linking: bool,
    pub describe: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        // Reorganization stays threshold-driven unless asked for explicitly.
        Self {
            ocr: true,
            reorganize: false,
            metadata: true,
            linking: true,
            describe: true,
        }
    }
}

impl ProcessingConfig {
    /// Whether this node's configuration enables the given phase at all.
    /// Reorganization additionally triggers on the file-count threshold,
    /// which the executor checks separately.
    pub fn enables(&self, phase: Phase) -> bool {
        match phase {
            Phase::Ocr => self.ocr,
            Phase::Reorganization => self.reorganize,
            Phase::Metadata => self.metadata,
            Phase::Linking => self.linking,
            Phase::Description => self.describe,
            _ => true,
        }
    }
}

/// One uploaded file as listed in the queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub content_type: String,
    /// Set when upstream already stored the raw content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<ContentAddress>,
}

impl FileEntry {
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Text files are read and chunked; everything else becomes a reference
    /// record handled by the archival collaborator.
    pub fn is_text(&self) -> bool {
        self.content_type.starts_with("text/")
            || matches!(self.content_type.as_str(), "application/json" | "application/xml")
    }
}

/// One directory listed in the queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryGroup {
    pub path: String,
    #[serde(default)]
    pub config: ProcessingConfig,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Handoff contract from upstream ingestion, consumed once at batch start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub batch_id: String,
    pub root_path: String,
    pub uploader: String,
    pub groups: Vec<DirectoryGroup>,
}

// ============================================================================
// Per-node state
// ============================================================================

/// Entity identifier and last published version of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEntity {
    pub id: EntityId,
    pub version: u64,
}

/// Durable per-directory-node state, keyed by node path in `BatchState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub path: String,
    /// Path segments below the batch root; the root node has depth 0.
    pub depth: usize,
    /// Collection entity identifier, assigned once when the node is created.
    /// Known before publication so children can link to a parent whose
    /// entity has not been created yet.
    pub entity_id: EntityId,
    pub config: ProcessingConfig,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Child node paths. Grows during reorganization, never shrinks.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub children: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<PublishedEntity>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub completed: BTreeSet<Phase>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub failed: BTreeSet<Phase>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retries: BTreeMap<Phase, u32>,
    /// When set, the node is pending but not selectable until this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn new(path: impl Into<String>, depth: usize, config: ProcessingConfig) -> Self {
        Self {
            path: path.into(),
            depth,
            entity_id: EntityId::assigned(),
            config,
            files: Vec::new(),
            children: BTreeSet::new(),
            parent: None,
            entity: None,
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            retries: BTreeMap::new(),
            next_retry_at: None,
        }
    }

    /// Complete or failed-but-skipped: either way the phase is finished with
    /// this node.
    pub fn is_settled(&self, phase: Phase) -> bool {
        self.completed.contains(&phase) || self.failed.contains(&phase)
    }

    pub fn mark_completed(&mut self, phase: Phase) {
        self.completed.insert(phase);
        self.next_retry_at = None;
    }

    pub fn mark_failed(&mut self, phase: Phase) {
        self.failed.insert(phase);
        self.next_retry_at = None;
    }

    /// Record one more failure for the phase; returns the new count.
    pub fn record_retry(&mut self, phase: Phase, next_retry_at: DateTime<Utc>) -> u32 {
        let count = self.retries.entry(phase).or_insert(0);
        *count += 1;
        self.next_retry_at = Some(next_retry_at);
        *count
    }

    pub fn retry_count(&self, phase: Phase) -> u32 {
        self.retries.get(&phase).copied().unwrap_or(0)
    }

    pub fn set_published(&mut self, id: EntityId, version: u64) {
        self.entity = Some(PublishedEntity { id, version });
    }

    /// Drop all bookkeeping for one phase (used by reset).
    pub fn clear_phase(&mut self, phase: Phase) {
        self.completed.remove(&phase);
        self.failed.remove(&phase);
        self.retries.remove(&phase);
        self.next_retry_at = None;
    }
}

// ============================================================================
// Batch state
// ============================================================================

/// Why a batch sits in ERROR, and where to resume from on reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub phase: Phase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Durable state of one batch. Owned exclusively by one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    pub phase: Phase,
    pub root_path: String,
    pub uploader: String,
    pub nodes: BTreeMap<String, NodeState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_entity: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BatchFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchState {
    pub fn new(
        batch_id: impl Into<String>,
        root_path: impl Into<String>,
        uploader: impl Into<String>,
        nodes: BTreeMap<String, NodeState>,
    ) -> Self {
        let now = Utc::now();
        Self {
            batch_id: batch_id.into(),
            phase: Phase::Uploading,
            root_path: root_path.into(),
            uploader: uploader.into(),
            nodes,
            root_entity: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, path: &str) -> Option<&NodeState> {
        self.nodes.get(path)
    }

    pub fn node_mut(&mut self, path: &str) -> Option<&mut NodeState> {
        self.nodes.get_mut(path)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// All nodes settled for the given phase.
    pub fn phase_settled(&self, phase: Phase) -> bool {
        self.nodes.values().all(|n| n.is_settled(phase))
    }

    /// Node paths not yet settled for the given phase.
    pub fn unsettled_paths(&self, phase: Phase) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| !n.is_settled(phase))
            .map(|n| n.path.clone())
            .collect()
    }

    pub fn counts(&self, phase: Phase) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        for node in self.nodes.values() {
            if node.completed.contains(&phase) {
                counts.completed += 1;
            } else if node.failed.contains(&phase) {
                counts.failed += 1;
            } else {
                counts.pending += 1;
            }
        }
        counts
    }

    /// Move the batch to ERROR, remembering where it was for reset.
    pub fn enter_error(&mut self, message: impl Into<String>) {
        // A second failure while already in ERROR keeps the original phase.
        let phase = match &self.failure {
            Some(failure) => failure.phase,
            None => self.phase,
        };
        self.failure = Some(BatchFailure {
            phase,
            message: message.into(),
            at: Utc::now(),
        });
        self.phase = Phase::Error;
        self.touch();
    }

    /// Admin reset: restore the interrupted phase (if in ERROR) and clear all
    /// in-flight flags for it. Published entity versions are untouched.
    pub fn reset_in_flight(&mut self) {
        if self.phase == Phase::Error {
            if let Some(failure) = self.failure.take() {
                self.phase = failure.phase;
            }
        }
        let phase = self.phase;
        for node in self.nodes.values_mut() {
            node.clear_phase(phase);
        }
        self.touch();
    }

    pub fn status(&self) -> BatchStatus {
        let counts = Phase::SEQUENCE
            .iter()
            .map(|&phase| (phase, self.counts(phase)))
            .collect();
        let failures = self
            .nodes
            .values()
            .flat_map(|node| {
                node.failed.iter().map(|&phase| NodeFailure {
                    path: node.path.clone(),
                    phase,
                    retries: node.retry_count(phase),
                })
            })
            .collect();
        BatchStatus {
            batch_id: self.batch_id.clone(),
            phase: self.phase,
            counts,
            failures,
            root_entity: self.root_entity.clone(),
            error: self.failure.clone(),
            updated_at: self.updated_at,
        }
    }
}

// ============================================================================
// Status reporting
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// A node that exhausted its retry budget in some phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub path: String,
    pub phase: Phase,
    pub retries: u32,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub phase: Phase,
    pub counts: BTreeMap<Phase, PhaseCounts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<NodeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_entity: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchFailure>,
    pub updated_at: DateTime<Utc>,
}
