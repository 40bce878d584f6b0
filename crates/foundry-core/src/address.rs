//! Chunk address grammar.
//!
//! A chunk address names content inside a published collection:
//! `{collection-id}:{filename}` for a whole file, with an optional
//! `#{chunk-id}` suffix selecting one chunk of it. Parsing splits on the first
//! `:` (collection identifiers never contain one) and then on the first `#`
//! of the remainder, so filenames may contain further colons.

use crate::entity::EntityId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Structurally invalid chunk addresses. Caller errors, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("chunk address '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    #[error("chunk address '{0}' has an empty collection identifier")]
    EmptyCollection(String),

    #[error("chunk address '{0}' has an empty filename")]
    EmptyFilename(String),
}

/// Parsed form of `collection:filename[#chunk_N]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkAddress {
    pub collection: EntityId,
    pub filename: String,
    pub chunk_id: Option<String>,
}

impl ChunkAddress {
    /// Address of a whole file within a collection.
    pub fn whole_file(collection: EntityId, filename: impl Into<String>) -> Self {
        Self {
            collection,
            filename: filename.into(),
            chunk_id: None,
        }
    }

    /// Address of chunk `index` (0-based) of a file within a collection.
    pub fn chunk(collection: EntityId, filename: impl Into<String>, index: usize) -> Self {
        Self {
            collection,
            filename: filename.into(),
            chunk_id: Some(format!("chunk_{index}")),
        }
    }

    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let (collection, rest) = input
            .split_once(':')
            .ok_or_else(|| AddressError::MissingSeparator(input.to_string()))?;
        if collection.is_empty() {
            return Err(AddressError::EmptyCollection(input.to_string()));
        }

        let (filename, chunk_id) = match rest.split_once('#') {
            // A bare trailing '#' means the whole file.
            Some((filename, "")) => (filename, None),
            Some((filename, chunk_id)) => (filename, Some(chunk_id.to_string())),
            None => (rest, None),
        };
        if filename.is_empty() {
            return Err(AddressError::EmptyFilename(input.to_string()));
        }

        Ok(Self {
            collection: EntityId::from(collection),
            filename: filename.to_string(),
            chunk_id,
        })
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.filename)?;
        if let Some(chunk_id) = &self.chunk_id {
            write!(f, "#{chunk_id}")?;
        }
        Ok(())
    }
}

impl FromStr for ChunkAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChunkAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChunkAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
