//! Manifest documents enumerating the artifacts of a model
//!
//! ```json
//! {
//!   "files": [
//!     { "url": "/models/engine.wasm", "type": "engine" },
//!     { "url": "shard-0.bin", "type": "weight", "description": "layers 0-11" }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::ArtifactRole;

/// One file listed by a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Locator of the file
    pub url: String,
    /// Role of the file
    #[serde(rename = "type")]
    pub role: ArtifactRole,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Ordered list of files needed to assemble a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse a manifest from raw JSON bytes
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
