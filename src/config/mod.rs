//! Configuration system for vaporllm
//!
//! VaporConfig gathers runner, cache and server settings plus any
//! extra registry entries, and can be read from YAML or JSON.

mod cache;
mod generation;
mod runner;
mod server;

pub use cache::CacheConfig;
pub use generation::GenerationConfig;
pub use runner::{BackendPreference, ModelSelection, RunnerConfig};
pub use server::ServerConfig;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ModelDescriptor, ModelRegistry};

/// Environment variable naming the default local asset directory
pub const ASSET_DIR_ENV: &str = "VAPORLLM_ASSET_DIR";

/// vaporllm configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaporConfig {
    /// Runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Shared artifact cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Server settings (only for `vaporllm serve`)
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Registry entries added to the built-in table
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl VaporConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = read(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// Load by extension: `.json` as JSON, anything else as YAML
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(path),
            _ => Self::from_yaml(path),
        }
    }

    /// Built-in registry extended with the configured models
    pub fn registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::builtin();
        registry.extend(self.models.iter().cloned());
        registry
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Cannot read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Library;

    #[test]
    fn test_vapor_config_yaml() {
        let yaml = r#"
runner:
  modelUrl: /models/dummy_tiny_model.bin
  backend: wasm
  enableCache: false
  base_url: http://127.0.0.1:3000
  generation:
    max_new_tokens: 64

cache:
  max_entries: 8

server:
  port: 8080

models:
  - name: local-gpt2
    library: transformers
    path: http://127.0.0.1:8081/generate
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaporllm.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = VaporConfig::from_path(&path).unwrap();
        assert_eq!(
            config.runner.model_url.as_deref(),
            Some("/models/dummy_tiny_model.bin")
        );
        assert_eq!(config.runner.backend, BackendPreference::Wasm);
        assert!(!config.runner.enable_cache);
        assert_eq!(config.cache.max_entries, 8);
        assert!(config.cache.enabled);
        assert_eq!(config.runner.generation.max_new_tokens, 64);
        assert_eq!(config.runner.generation.top_p, 0.95);
        assert_eq!(config.server.as_ref().unwrap().port, 8080);

        let registry = config.registry();
        let added = registry.lookup("local-gpt2").unwrap();
        assert_eq!(added.library, Library::Transformers);
        assert!(registry.lookup("gpt2").is_ok());
    }

    #[test]
    fn test_vapor_config_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaporllm.json");
        std::fs::write(&path, r#"{ "runner": { "model": "gpt2" } }"#).unwrap();

        let config = VaporConfig::from_path(&path).unwrap();
        assert_eq!(config.runner.model.as_deref(), Some("gpt2"));
        assert!(config.server.is_none());
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_unreadable_config() {
        let err = VaporConfig::from_yaml("/nonexistent/vaporllm.yaml").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
