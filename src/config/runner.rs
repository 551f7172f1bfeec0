//! Runner configuration
//!
//! One schema covers both ways of naming a model:
//! - registry mode: `model: gpt2`
//! - direct mode: `model_url: /models/dummy_tiny_model.bin` plus `backend`
//!
//! Keys are snake_case; the camelCase spellings are accepted as aliases.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::GenerationConfig;

use super::ASSET_DIR_ENV;
use crate::error::{Error, Result};

/// Backend requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Pick from the environment
    #[default]
    Auto,
    Wasm,
    Webgl,
    Webgpu,
    Onnx,
    Transformers,
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Wasm => "wasm",
            Self::Webgl => "webgl",
            Self::Webgpu => "webgpu",
            Self::Onnx => "onnx",
            Self::Transformers => "transformers",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BackendPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "wasm" => Ok(Self::Wasm),
            "webgl" => Ok(Self::Webgl),
            "webgpu" => Ok(Self::Webgpu),
            "onnx" => Ok(Self::Onnx),
            "transformers" => Ok(Self::Transformers),
            other => Err(Error::config(format!("unknown backend: '{}'", other))),
        }
    }
}

/// How the model is named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelection<'a> {
    /// Registry key
    Registry(&'a str),
    /// Model locator with an explicit backend preference
    Direct {
        model_url: &'a str,
        backend: BackendPreference,
    },
}

/// Settings for one runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Registry key (registry mode)
    #[serde(default)]
    pub model: Option<String>,

    /// Model locator (direct mode)
    #[serde(default, alias = "modelUrl")]
    pub model_url: Option<String>,

    /// Backend for direct mode
    #[serde(default)]
    pub backend: BackendPreference,

    /// Route fetches through the shared cache
    #[serde(default = "default_true", alias = "enableCache")]
    pub enable_cache: bool,

    /// Engine module locator for byte-code backends
    #[serde(default = "default_engine_url", alias = "engineUrl")]
    pub engine_url: String,

    /// Manifest locator; replaces the engine/model fetch pair when set
    #[serde(default, alias = "manifestUrl")]
    pub manifest_url: Option<String>,

    /// HTTP origin for relative locators
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,

    /// Local directory for relative locators when no base URL is set
    #[serde(default = "default_asset_root", alias = "assetRoot")]
    pub asset_root: PathBuf,

    /// Per-request fetch timeout
    #[serde(default = "default_fetch_timeout", alias = "fetchTimeoutSecs")]
    pub fetch_timeout_secs: u64,

    /// Origin that generation-pipeline model paths resolve against when no
    /// `base_url` is set
    #[serde(default = "default_pipeline_url", alias = "pipelineUrl")]
    pub pipeline_url: String,

    /// Parameters for generation pipelines
    #[serde(default)]
    pub generation: GenerationConfig,
}

fn default_true() -> bool {
    true
}

fn default_engine_url() -> String {
    "/models/engine.wasm".to_string()
}

fn default_asset_root() -> PathBuf {
    std::env::var(ASSET_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./assets"))
}

fn default_fetch_timeout() -> u64 {
    300 // 5 minutes
}

fn default_pipeline_url() -> String {
    "http://127.0.0.1:8080/".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: None,
            model_url: None,
            backend: BackendPreference::Auto,
            enable_cache: true,
            engine_url: default_engine_url(),
            manifest_url: None,
            base_url: None,
            asset_root: default_asset_root(),
            fetch_timeout_secs: default_fetch_timeout(),
            pipeline_url: default_pipeline_url(),
            generation: GenerationConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Registry-mode config for `name`
    pub fn registry(name: impl Into<String>) -> Self {
        Self {
            model: Some(name.into()),
            ..Default::default()
        }
    }

    /// Direct-mode config for `model_url` on `backend`
    pub fn direct(model_url: impl Into<String>, backend: BackendPreference) -> Self {
        Self {
            model_url: Some(model_url.into()),
            backend,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = asset_root.into();
        self
    }

    pub fn with_manifest(mut self, manifest_url: impl Into<String>) -> Self {
        self.manifest_url = Some(manifest_url.into());
        self
    }

    pub fn with_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = enable_cache;
        self
    }

    pub fn with_pipeline_url(mut self, pipeline_url: impl Into<String>) -> Self {
        self.pipeline_url = pipeline_url.into();
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Whether a model source is named at all
    pub fn has_model(&self) -> bool {
        self.model.is_some() || self.model_url.is_some()
    }

    /// Which mode this config selects
    ///
    /// Exactly one of `model` and `model_url` must be set.
    pub fn selection(&self) -> Result<ModelSelection<'_>> {
        match (self.model.as_deref(), self.model_url.as_deref()) {
            (Some(name), None) => Ok(ModelSelection::Registry(name)),
            (None, Some(model_url)) => Ok(ModelSelection::Direct {
                model_url,
                backend: self.backend,
            }),
            (Some(_), Some(_)) => Err(Error::config(
                "set either 'model' or 'model_url', not both",
            )),
            (None, None) => Err(Error::config("one of 'model' or 'model_url' is required")),
        }
    }

    /// Check the config without touching the network
    pub fn validate(&self) -> Result<()> {
        self.selection()?;
        if self.fetch_timeout_secs == 0 {
            return Err(Error::config("fetch_timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_aliases() {
        let json = r#"{
            "modelUrl": "/models/dummy_tiny_model.bin",
            "backend": "wasm",
            "enableCache": false,
            "engineUrl": "/engines/tiny.wasm"
        }"#;
        let config: RunnerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.selection().unwrap(),
            ModelSelection::Direct {
                model_url: "/models/dummy_tiny_model.bin",
                backend: BackendPreference::Wasm,
            }
        );
        assert!(!config.enable_cache);
        assert_eq!(config.engine_url, "/engines/tiny.wasm");
    }

    #[test]
    fn test_defaults() {
        let config: RunnerConfig = serde_json::from_str(r#"{ "model": "gpt2" }"#).unwrap();
        assert_eq!(config.selection().unwrap(), ModelSelection::Registry("gpt2"));
        assert!(config.enable_cache);
        assert_eq!(config.engine_url, "/models/engine.wasm");
        assert_eq!(config.backend, BackendPreference::Auto);
        assert!(config.manifest_url.is_none());
        assert_eq!(config.pipeline_url, "http://127.0.0.1:8080/");
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn test_exactly_one_model_source() {
        let mut both = RunnerConfig::registry("gpt2");
        both.model_url = Some("/models/gpt2".to_string());
        assert!(matches!(both.validate(), Err(Error::Config { .. })));

        assert!(RunnerConfig::default().validate().is_err());
        assert!(!RunnerConfig::default().has_model());
        assert!(RunnerConfig::direct("/m.bin", BackendPreference::Wasm)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result: std::result::Result<RunnerConfig, _> =
            serde_json::from_str(r#"{ "model": "gpt2", "backend": "cuda" }"#);
        assert!(result.is_err());

        assert_eq!(
            "WebGPU".parse::<BackendPreference>().unwrap(),
            BackendPreference::Webgpu
        );
        assert!("cuda".parse::<BackendPreference>().is_err());
    }
}
