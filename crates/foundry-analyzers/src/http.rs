//! HTTP analyzer adapters.
//!
//! Each capability posts its request as JSON to a fixed endpoint under one
//! configured base URL (`/ocr`, `/metadata`, `/organize`, `/links`,
//! `/describe`) and decodes the JSON reply into the capability's response
//! type. Transport failures map onto the analyzer error taxonomy: client
//! errors are rejections (not retried), server errors and connection failures
//! are unavailability (retried), slow replies are timeouts (retried).

use async_trait::async_trait;
use foundry_core::{
    AnalyzerError, AnalyzerResult, DescribeRequest, DescribeResponse, Describer, LinkAnalyzer,
    LinkRequest, LinkResponse, MetadataAnalyzer, MetadataRequest, MetadataResponse, OcrAnalyzer,
    OcrRequest, OcrResponse, OrganizeRequest, OrganizeResponse, Organizer,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Where the analyzer service lives and how long a call may take.
#[derive(Debug, Clone)]
pub struct HttpAnalyzerConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpAnalyzerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Shared request plumbing for the adapter family.
#[derive(Clone)]
struct AnalyzerTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl AnalyzerTransport {
    fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    async fn post<Req, Resp>(&self, endpoint: &str, request: &Req) -> AnalyzerResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AnalyzerError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    AnalyzerError::unavailable(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::unavailable(format!("{status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|err| AnalyzerError::InvalidResponse(err.to_string()))
    }
}

pub struct HttpOcrAnalyzer {
    transport: AnalyzerTransport,
}

impl HttpOcrAnalyzer {
    pub fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            transport: AnalyzerTransport::new(config),
        }
    }
}

#[async_trait]
impl OcrAnalyzer for HttpOcrAnalyzer {
    async fn extract_text(&self, request: OcrRequest) -> AnalyzerResult<OcrResponse> {
        self.transport.post("ocr", &request).await
    }
}

pub struct HttpMetadataAnalyzer {
    transport: AnalyzerTransport,
}

impl HttpMetadataAnalyzer {
    pub fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            transport: AnalyzerTransport::new(config),
        }
    }
}

#[async_trait]
impl MetadataAnalyzer for HttpMetadataAnalyzer {
    async fn extract_metadata(&self, request: MetadataRequest) -> AnalyzerResult<MetadataResponse> {
        self.transport.post("metadata", &request).await
    }
}

pub struct HttpOrganizer {
    transport: AnalyzerTransport,
}

impl HttpOrganizer {
    pub fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            transport: AnalyzerTransport::new(config),
        }
    }
}

#[async_trait]
impl Organizer for HttpOrganizer {
    async fn organize(&self, request: OrganizeRequest) -> AnalyzerResult<OrganizeResponse> {
        self.transport.post("organize", &request).await
    }
}

pub struct HttpLinkAnalyzer {
    transport: AnalyzerTransport,
}

impl HttpLinkAnalyzer {
    pub fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            transport: AnalyzerTransport::new(config),
        }
    }
}

#[async_trait]
impl LinkAnalyzer for HttpLinkAnalyzer {
    async fn extract_links(&self, request: LinkRequest) -> AnalyzerResult<LinkResponse> {
        self.transport.post("links", &request).await
    }
}

pub struct HttpDescriber {
    transport: AnalyzerTransport,
}

impl HttpDescriber {
    pub fn new(config: &HttpAnalyzerConfig) -> Self {
        Self {
            transport: AnalyzerTransport::new(config),
        }
    }
}

#[async_trait]
impl Describer for HttpDescriber {
    async fn describe(&self, request: DescribeRequest) -> AnalyzerResult<DescribeResponse> {
        self.transport.post("describe", &request).await
    }
}
