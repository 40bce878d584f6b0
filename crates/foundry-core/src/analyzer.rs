//! Analyzer capability traits.
//!
//! The analyzers themselves (OCR, metadata extraction, organization, link
//! extraction, description) live outside this system; phases consume them only
//! through these request/response seams. Implementations are injected as an
//! [`AnalyzerSuite`] of `Arc<dyn …>` handles.

use crate::content::ContentAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("analyzer timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid analyzer response: {0}")]
    InvalidResponse(String),

    #[error("analyzer rejected request: {0}")]
    Rejected(String),
}

impl AnalyzerError {
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable(message.into())
    }

    /// A rejection means the request itself is wrong; retrying cannot help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

// ============================================================================
// Request / response payloads
// ============================================================================

/// A filename with a bounded excerpt of its text, the common currency of the
/// aggregation analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSample {
    pub filename: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRequest {
    pub filename: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_address: Option<ContentAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub path: String,
    pub samples: Vec<DocumentSample>,
    /// Already-published metadata of child collections, one value per child.
    #[serde(default)]
    pub child_metadata: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeRequest {
    pub path: String,
    pub files: Vec<String>,
}

/// One proposed grouping. Groups may overlap: the same file can appear in
/// several of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    pub name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizeResponse {
    pub groups: Vec<FileGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub path: String,
    pub documents: Vec<DocumentSample>,
    /// Links child collections already extracted, flattened across children.
    #[serde(default)]
    pub child_links: Vec<DocumentLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub from: String,
    pub to: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResponse {
    pub links: Vec<DocumentLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub path: String,
    pub samples: Vec<DocumentSample>,
    /// Already-published descriptions of child collections, so a parent's
    /// description can aggregate them.
    #[serde(default)]
    pub child_descriptions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub description: String,
}

// ============================================================================
// Capability traits
// ============================================================================

#[async_trait]
pub trait OcrAnalyzer: Send + Sync {
    async fn extract_text(&self, request: OcrRequest) -> AnalyzerResult<OcrResponse>;
}

#[async_trait]
pub trait MetadataAnalyzer: Send + Sync {
    async fn extract_metadata(&self, request: MetadataRequest) -> AnalyzerResult<MetadataResponse>;
}

#[async_trait]
pub trait Organizer: Send + Sync {
    async fn organize(&self, request: OrganizeRequest) -> AnalyzerResult<OrganizeResponse>;
}

#[async_trait]
pub trait LinkAnalyzer: Send + Sync {
    async fn extract_links(&self, request: LinkRequest) -> AnalyzerResult<LinkResponse>;
}

#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(&self, request: DescribeRequest) -> AnalyzerResult<DescribeResponse>;
}

/// The full set of analyzer capabilities a pipeline needs.
#[derive(Clone)]
pub struct AnalyzerSuite {
    pub ocr: Arc<dyn OcrAnalyzer>,
    pub metadata: Arc<dyn MetadataAnalyzer>,
    pub organizer: Arc<dyn Organizer>,
    pub links: Arc<dyn LinkAnalyzer>,
    pub describer: Arc<dyn Describer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_not_retryable() {
        assert!(AnalyzerError::Unavailable("down".into()).is_retryable());
        assert!(AnalyzerError::Timeout(5000).is_retryable());
        assert!(AnalyzerError::InvalidResponse("bad json".into()).is_retryable());
        assert!(!AnalyzerError::Rejected("unsupported mime type".into()).is_retryable());
    }

    #[test]
    fn test_overlapping_groups_are_representable() {
        let response = OrganizeResponse {
            groups: vec![
                FileGroup {
                    name: "invoices".to_string(),
                    files: vec!["a.pdf".to_string(), "b.pdf".to_string()],
                },
                FileGroup {
                    name: "2024".to_string(),
                    files: vec!["b.pdf".to_string()],
                },
            ],
        };

        let json = serde_json::to_string(&response).unwrap();
        let back: OrganizeResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
        // b.pdf is a member of both groups.
        assert!(back.groups.iter().all(|g| g.files.contains(&"b.pdf".to_string())));
    }
}
