//! Analyzer capability implementations.
//!
//! Two families behind the `foundry-core` traits: `Http*` adapters that post
//! JSON to a configured analyzer service, and `Static*` stubs with
//! deterministic canned output for tests and offline runs.

pub mod http;
pub mod stubs;

pub use http::{
    HttpAnalyzerConfig, HttpDescriber, HttpLinkAnalyzer, HttpMetadataAnalyzer, HttpOcrAnalyzer,
    HttpOrganizer,
};
pub use stubs::{
    StaticDescriber, StaticLinkAnalyzer, StaticMetadataAnalyzer, StaticOcrAnalyzer,
    StaticOrganizer,
};

use foundry_core::AnalyzerSuite;
use std::sync::Arc;

/// The full HTTP-backed suite against one analyzer service.
pub fn create_http_suite(config: &HttpAnalyzerConfig) -> AnalyzerSuite {
    AnalyzerSuite {
        ocr: Arc::new(HttpOcrAnalyzer::new(config)),
        metadata: Arc::new(HttpMetadataAnalyzer::new(config)),
        organizer: Arc::new(HttpOrganizer::new(config)),
        links: Arc::new(HttpLinkAnalyzer::new(config)),
        describer: Arc::new(HttpDescriber::new(config)),
    }
}

/// The deterministic stub suite.
pub fn create_static_suite() -> AnalyzerSuite {
    AnalyzerSuite {
        ocr: Arc::new(StaticOcrAnalyzer),
        metadata: Arc::new(StaticMetadataAnalyzer),
        organizer: Arc::new(StaticOrganizer),
        links: Arc::new(StaticLinkAnalyzer),
        describer: Arc::new(StaticDescriber),
    }
}
