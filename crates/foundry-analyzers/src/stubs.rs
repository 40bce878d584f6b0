//! Deterministic stub analyzers.
//!
//! Canned, side-effect-free implementations for tests and offline runs. Every
//! response is a pure function of the request, so pipeline runs against the
//! static suite are exactly reproducible.

use async_trait::async_trait;
use foundry_core::{
    AnalyzerResult, DescribeRequest, DescribeResponse, Describer, DocumentLink, FileGroup,
    LinkAnalyzer, LinkRequest, LinkResponse, MetadataAnalyzer, MetadataRequest, MetadataResponse,
    OcrAnalyzer, OcrRequest, OcrResponse, OrganizeRequest, OrganizeResponse, Organizer,
};
use std::collections::BTreeMap;

pub struct StaticOcrAnalyzer;

#[async_trait]
impl OcrAnalyzer for StaticOcrAnalyzer {
    async fn extract_text(&self, request: OcrRequest) -> AnalyzerResult<OcrResponse> {
        Ok(OcrResponse {
            text: format!("Recognized text of {}", request.filename),
        })
    }
}

pub struct StaticMetadataAnalyzer;

#[async_trait]
impl MetadataAnalyzer for StaticMetadataAnalyzer {
    async fn extract_metadata(&self, request: MetadataRequest) -> AnalyzerResult<MetadataResponse> {
        Ok(MetadataResponse {
            metadata: serde_json::json!({
                "source_path": request.path,
                "document_count": request.samples.len(),
                "subcollection_count": request.child_metadata.len(),
            }),
        })
    }
}

/// Groups files by extension. Files whose extension appears only once stay
/// ungrouped, which the reorganization phase reads as "leave with the parent".
pub struct StaticOrganizer;

#[async_trait]
impl Organizer for StaticOrganizer {
    async fn organize(&self, request: OrganizeRequest) -> AnalyzerResult<OrganizeResponse> {
        let mut by_extension: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in &request.files {
            let extension = file
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_else(|| "misc".to_string());
            by_extension.entry(extension).or_default().push(file.clone());
        }

        let groups = by_extension
            .into_iter()
            .filter(|(_, files)| files.len() > 1)
            .map(|(name, mut files)| {
                files.sort();
                FileGroup { name, files }
            })
            .collect();
        Ok(OrganizeResponse { groups })
    }
}

/// Links each document to its successor in filename order. Links the
/// children already extracted ride along unchanged.
pub struct StaticLinkAnalyzer;

#[async_trait]
impl LinkAnalyzer for StaticLinkAnalyzer {
    async fn extract_links(&self, request: LinkRequest) -> AnalyzerResult<LinkResponse> {
        let mut names: Vec<&str> = request
            .documents
            .iter()
            .map(|d| d.filename.as_str())
            .collect();
        names.sort_unstable();

        let mut links: Vec<DocumentLink> = names
            .windows(2)
            .map(|pair| DocumentLink {
                from: pair[0].to_string(),
                to: pair[1].to_string(),
                kind: "related".to_string(),
            })
            .collect();
        links.extend(request.child_links);
        Ok(LinkResponse { links })
    }
}

pub struct StaticDescriber;

#[async_trait]
impl Describer for StaticDescriber {
    async fn describe(&self, request: DescribeRequest) -> AnalyzerResult<DescribeResponse> {
        Ok(DescribeResponse {
            description: format!(
                "{}: {} documents, {} subcollections",
                request.path,
                request.samples.len(),
                request.child_descriptions.len()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_core::DocumentSample;

    #[tokio::test]
    async fn test_organizer_groups_by_extension() {
        let response = StaticOrganizer
            .organize(OrganizeRequest {
                path: "inbox".to_string(),
                files: vec![
                    "b.pdf".to_string(),
                    "a.pdf".to_string(),
                    "notes.txt".to_string(),
                    "x.CSV".to_string(),
                    "y.csv".to_string(),
                ],
            })
            .await
            .unwrap();

        assert_eq!(response.groups.len(), 2);
        assert_eq!(response.groups[0].name, "csv");
        assert_eq!(response.groups[0].files, vec!["x.CSV", "y.csv"]);
        assert_eq!(response.groups[1].name, "pdf");
        assert_eq!(response.groups[1].files, vec!["a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn test_links_chain_documents_in_name_order() {
        let documents = vec![
            DocumentSample {
                filename: "c.md".to_string(),
                excerpt: String::new(),
            },
            DocumentSample {
                filename: "a.md".to_string(),
                excerpt: String::new(),
            },
            DocumentSample {
                filename: "b.md".to_string(),
                excerpt: String::new(),
            },
        ];
        let response = StaticLinkAnalyzer
            .extract_links(LinkRequest {
                path: "docs".to_string(),
                documents,
                child_links: vec![],
            })
            .await
            .unwrap();

        assert_eq!(response.links.len(), 2);
        assert_eq!(response.links[0].from, "a.md");
        assert_eq!(response.links[0].to, "b.md");
        assert_eq!(response.links[1].from, "b.md");
        assert_eq!(response.links[1].to, "c.md");
    }

    #[tokio::test]
    async fn test_child_links_ride_along() {
        let child_link = DocumentLink {
            from: "q1.md".to_string(),
            to: "q2.md".to_string(),
            kind: "related".to_string(),
        };
        let response = StaticLinkAnalyzer
            .extract_links(LinkRequest {
                path: "docs".to_string(),
                documents: vec![
                    DocumentSample {
                        filename: "a.md".to_string(),
                        excerpt: String::new(),
                    },
                    DocumentSample {
                        filename: "b.md".to_string(),
                        excerpt: String::new(),
                    },
                ],
                child_links: vec![child_link.clone()],
            })
            .await
            .unwrap();

        assert_eq!(response.links.len(), 2);
        assert_eq!(response.links[1], child_link);
    }

    #[tokio::test]
    async fn test_responses_are_reproducible() {
        let request = DescribeRequest {
            path: "archive/2024".to_string(),
            samples: vec![DocumentSample {
                filename: "a.txt".to_string(),
                excerpt: "hello".to_string(),
            }],
            child_descriptions: vec!["q1".to_string(), "q2".to_string()],
        };

        let first = StaticDescriber.describe(request.clone()).await.unwrap();
        let second = StaticDescriber.describe(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.description, "archive/2024: 1 documents, 2 subcollections");
    }
}
