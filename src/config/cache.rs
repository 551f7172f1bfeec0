//! Artifact cache settings

use serde::{Deserialize, Serialize};

/// Bounds for the shared artifact cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memoize fetched buffers at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached buffers
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum total size of cached buffers in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    64
}

fn default_max_bytes() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
        }
    }
}
