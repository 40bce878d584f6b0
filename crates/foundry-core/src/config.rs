//! Pipeline and chunker configuration.
//!
//! Plain serde structs with defaults; loadable from TOML. Validation is
//! explicit so a bad config is rejected at startup rather than mid-batch.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Separator priority used by the splitter when none is configured:
/// paragraph break, line break, sentence end, clause break, word boundary,
/// then character-level.
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", ", ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Chunking parameters. All sizes count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Rough number of chunks to aim for per file; drives the adaptive size.
    pub target_chunks: usize,
    /// Files at or below this length are never chunked.
    pub min_chunk_size: usize,
    /// Upper bound on the adaptive chunk size.
    pub max_chunk_size: usize,
    /// Characters carried over between consecutive chunks.
    pub overlap: usize,
    /// Separator priority, coarsest first. An empty string means
    /// character-level splitting.
    pub separators: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunks: 50,
            min_chunk_size: 1000,
            max_chunk_size: 10_000,
            overlap: 200,
            separators: default_separators(),
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_chunks == 0 {
            return Err(ConfigError::Invalid("target_chunks must be > 0".into()));
        }
        if self.min_chunk_size == 0 {
            return Err(ConfigError::Invalid("min_chunk_size must be > 0".into()));
        }
        if self.max_chunk_size < self.min_chunk_size {
            return Err(ConfigError::Invalid(format!(
                "max_chunk_size ({}) must be >= min_chunk_size ({})",
                self.max_chunk_size, self.min_chunk_size
            )));
        }
        if self.overlap >= self.min_chunk_size {
            return Err(ConfigError::Invalid(format!(
                "overlap ({}) must be < min_chunk_size ({})",
                self.overlap, self.min_chunk_size
            )));
        }
        Ok(())
    }
}

/// Coordinator scheduling, retry, and fan-out parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum nodes taken per tick.
    pub max_nodes_per_tick: usize,
    /// In-tick parallelism across selected nodes.
    pub fan_out: usize,
    /// Node-level failures beyond this count mark the node failed-but-skipped.
    pub max_retries: u32,
    /// Delay before the next tick while work remains. Zero means re-tick
    /// immediately, which tests use to drive batches without waiting.
    pub tick_interval_ms: u64,
    /// Base of the exponential per-node retry backoff.
    pub retry_backoff_ms: u64,
    /// Upper bound on the random jitter added to each backoff.
    pub retry_jitter_ms: u64,
    /// Nodes with at least this many files are reorganized even when not
    /// explicitly configured for it.
    pub reorganize_threshold: usize,
    pub chunker: ChunkerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_nodes_per_tick: 8,
            fan_out: 4,
            max_retries: 3,
            tick_interval_ms: 1000,
            retry_backoff_ms: 2000,
            retry_jitter_ms: 250,
            reorganize_threshold: 12,
            chunker: ChunkerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_nodes_per_tick == 0 {
            return Err(ConfigError::Invalid("max_nodes_per_tick must be > 0".into()));
        }
        if self.fan_out == 0 {
            return Err(ConfigError::Invalid("fan_out must be > 0".into()));
        }
        self.chunker.validate()
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Exponential backoff for the nth retry (1-based), capped at one minute.
    /// Jitter is added by the scheduler, not here.
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        let exp = retries.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(60_000);
        Duration::from_millis(ms)
    }
}
