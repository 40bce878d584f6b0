//! Versioned entity records.
//!
//! An entity is the published form of a directory node or file: an identifier,
//! a monotonically increasing version, a map of named components (each a
//! content-address), and parent/child linkage. Entities are immutable per
//! version; every mutation is a new version pointing at new or old components.

use crate::content::ContentAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Well-known component names.
pub mod component {
    /// Per-collection chunking manifest (JSON, see `ChunksManifest`).
    pub const CHUNKS_MANIFEST: &str = "chunks_manifest";
    /// Per-collection filename to file-entity mapping (JSON, see `FileRecords`).
    pub const FILE_RECORDS: &str = "file_records";
    /// Reference record of a binary file entity (JSON, see `ReferenceRecord`).
    pub const REFERENCE: &str = "reference";
    /// Extracted metadata, written during the metadata phase.
    pub const METADATA: &str = "metadata";
    /// Extracted document links, written during the linking phase.
    pub const LINKS: &str = "links";
    /// Generated description, written during the description phase.
    pub const DESCRIPTION: &str = "description";
}

/// Opaque entity identifier.
///
/// Collection entities get an assigned UUID; file entities and reorganized
/// child collections get deterministic identifiers derived from the parent
/// id, so that re-publishing the same file or replaying the same split never
/// mints a second identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Freshly assigned identifier for a collection entity.
    pub fn assigned() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic identifier for a file entity under the given parent.
    pub fn for_file(parent: &EntityId, filename: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(parent.0.as_bytes());
        hasher.update(&[0x1f]);
        hasher.update(filename.as_bytes());
        let digest = hasher.finalize();
        Self(format!("file-{}", &hex::encode(digest.as_bytes())[..32]))
    }

    /// Deterministic identifier for a child collection split out of `parent`
    /// during reorganization.
    pub fn for_group(parent: &EntityId, name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(parent.0.as_bytes());
        hasher.update(&[0x1e]);
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        Self(format!("group-{}", &hex::encode(digest.as_bytes())[..32]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

/// Inline metadata carried by file entities.
///
/// Kept in the record itself rather than behind a component address so the
/// common "list files with sizes" read costs one fetch, not N.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProperties {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_key: Option<String>,
}

/// What an entity represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Collection { name: String },
    File { properties: FileProperties },
}

impl EntityKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, EntityKind::Collection { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, EntityKind::File { .. })
    }
}

/// A single version of a published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub version: u64,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub children: BTreeSet<EntityId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ContentAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Draft a new collection entity. The store assigns version 1 on create.
    pub fn collection(id: EntityId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: 1,
            kind: EntityKind::Collection { name: name.into() },
            parent: None,
            children: BTreeSet::new(),
            components: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Draft a new file entity under `parent`. The identifier is derived from
    /// the parent identifier and the filename.
    pub fn file(parent: &EntityId, properties: FileProperties) -> Self {
        let id = EntityId::for_file(parent, &properties.filename);
        let now = Utc::now();
        Self {
            id,
            version: 1,
            kind: EntityKind::File { properties },
            parent: Some(parent.clone()),
            children: BTreeSet::new(),
            components: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_component(mut self, name: impl Into<String>, address: ContentAddress) -> Self {
        self.components.insert(name.into(), address);
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: impl IntoIterator<Item = EntityId>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn component(&self, name: &str) -> Option<&ContentAddress> {
        self.components.get(name)
    }

    pub fn set_component(&mut self, name: impl Into<String>, address: ContentAddress) {
        self.components.insert(name.into(), address);
    }

    /// Inline properties, if this is a file entity.
    pub fn file_properties(&self) -> Option<&FileProperties> {
        match &self.kind {
            EntityKind::File { properties } => Some(properties),
            EntityKind::Collection { .. } => None,
        }
    }
}
