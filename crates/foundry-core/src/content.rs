//! Content addressing.
//!
//! Every immutable payload in the system (file text, chunk text, manifests,
//! reference records) is identified by the BLAKE3 digest of its bytes. Identical
//! bytes always resolve to the identical address, which is what makes re-running
//! a publish step after a crash a no-op.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scheme prefix in the rendered form, e.g. `blake3:af1349b9...`.
pub const ADDRESS_SCHEME: &str = "blake3";

/// Errors produced when parsing a rendered content address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentAddressError {
    #[error("content address '{0}' is missing the '{ADDRESS_SCHEME}:' scheme")]
    MissingScheme(String),

    #[error("content address '{0}' has an invalid digest")]
    InvalidDigest(String),
}

/// BLAKE3 digest identifying a stored blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress([u8; 32]);

impl ContentAddress {
    /// Address of the given bytes.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Address of the given text's UTF-8 bytes.
    pub fn for_text(text: &str) -> Self {
        Self::for_bytes(text.as_bytes())
    }

    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", ADDRESS_SCHEME, self.to_hex())
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Digests are noisy in logs; eight hex chars are enough to eyeball.
        write!(f, "ContentAddress({}:{}..)", ADDRESS_SCHEME, &self.to_hex()[..8])
    }
}

impl FromStr for ContentAddress {
    type Err = ContentAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = s
            .strip_prefix(ADDRESS_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| ContentAddressError::MissingScheme(s.to_string()))?;

        let bytes =
            hex::decode(digest).map_err(|_| ContentAddressError::InvalidDigest(s.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ContentAddressError::InvalidDigest(s.to_string()))?;
        Ok(Self(digest))
    }
}

impl Serialize for ContentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
