//! Fetched artifact buffers

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Role an artifact plays when a backend is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    /// Byte-code engine module
    Engine,
    /// Weight shard
    Weight,
    /// Manifest document. Only used to label fetch failures, never appended.
    #[serde(skip_deserializing)]
    Manifest,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRole::Engine => write!(f, "engine"),
            ArtifactRole::Weight => write!(f, "weight"),
            ArtifactRole::Manifest => write!(f, "manifest"),
        }
    }
}

/// A fetched buffer with its role and position in the loader sequence
///
/// The buffer is reference-counted and immutable; clones alias the same bytes,
/// which may also be held by the cache and by other runners.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Role tag
    pub role: ArtifactRole,
    /// Position in the loader sequence
    pub index: usize,
    /// Canonical source URL
    pub url: String,
    /// Raw contents
    pub data: Bytes,
}

impl Artifact {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
