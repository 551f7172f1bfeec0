//! CLI commands
//!
//! Provides the `vaporllm` command line: run prompts through a model, serve
//! it over HTTP, and inspect or fetch registry models.

mod fetch;
mod info;
mod list;
mod run;
mod serve;

pub use fetch::fetch;
pub use info::info;
pub use list::list;
pub use run::run;
pub use serve::serve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::cache::ArtifactCache;
use crate::config::{BackendPreference, VaporConfig};
use crate::engine::Runner;
use crate::model::ModelRegistry;

/// vaporllm - Load model artifacts and run them on a pluggable backend
#[derive(Parser)]
#[command(name = "vaporllm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one prompt, or an interactive session, through a model
    Run {
        #[command(flatten)]
        runner: RunnerArgs,

        /// Prompt to run once (omit for an interactive session)
        #[arg(long, short)]
        prompt: Option<String>,
    },

    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        runner: RunnerArgs,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Directory served as static artifacts (defaults to the asset root)
        #[arg(long)]
        assets_dir: Option<PathBuf>,
    },

    /// List registry models
    List {
        /// Optional configuration file with extra models
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Show detailed information
        #[arg(long, short)]
        verbose: bool,
    },

    /// Show a model's descriptor and load plan
    Info {
        #[command(flatten)]
        runner: RunnerArgs,
    },

    /// Download every artifact listed in a manifest
    Fetch {
        /// Manifest URL or path
        manifest: String,

        /// Output directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,

        /// Base URL for relative locators
        #[arg(long)]
        base_url: Option<String>,
    },
}

/// Model selection and loading flags shared by several commands
#[derive(Args, Debug, Clone, Default)]
pub struct RunnerArgs {
    /// Registry model name
    #[arg(long, short)]
    pub model: Option<String>,

    /// Model URL or path, bypassing the registry
    #[arg(long, conflicts_with = "model")]
    pub model_url: Option<String>,

    /// Backend for --model-url (auto, wasm, webgl, webgpu, onnx, transformers)
    #[arg(long)]
    pub backend: Option<BackendPreference>,

    /// Byte-code engine module location
    #[arg(long)]
    pub engine_url: Option<String>,

    /// Artifact manifest location
    #[arg(long)]
    pub manifest: Option<String>,

    /// Base URL for relative locators
    #[arg(long)]
    pub base_url: Option<String>,

    /// Generation endpoint origin when no base URL is set
    #[arg(long)]
    pub pipeline_url: Option<String>,

    /// Local directory for relative locators when no base URL is set
    #[arg(long)]
    pub asset_root: Option<PathBuf>,

    /// Configuration file (YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Fetch without the artifact cache
    #[arg(long)]
    pub no_cache: bool,
}

impl RunnerArgs {
    /// Read the configuration file, if any, and apply flag overrides
    pub fn load_config(&self) -> Result<VaporConfig> {
        let mut config = match &self.config {
            Some(path) => VaporConfig::from_path(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => VaporConfig::default(),
        };

        let runner = &mut config.runner;
        if self.model.is_some() {
            runner.model = self.model.clone();
            runner.model_url = None;
        }
        if self.model_url.is_some() {
            runner.model_url = self.model_url.clone();
            runner.model = None;
        }
        if let Some(backend) = self.backend {
            runner.backend = backend;
        }
        if let Some(engine_url) = &self.engine_url {
            runner.engine_url = engine_url.clone();
        }
        if self.manifest.is_some() {
            runner.manifest_url = self.manifest.clone();
        }
        if self.base_url.is_some() {
            runner.base_url = self.base_url.clone();
        }
        if let Some(pipeline_url) = &self.pipeline_url {
            runner.pipeline_url = pipeline_url.clone();
        }
        if let Some(asset_root) = &self.asset_root {
            runner.asset_root = asset_root.clone();
        }
        if self.no_cache {
            runner.enable_cache = false;
        }

        Ok(config)
    }
}

/// Everything a command needs to drive one model
pub struct Session {
    pub config: VaporConfig,
    pub registry: Arc<ModelRegistry>,
    pub cache: ArtifactCache,
    /// `None` when neither a model nor a model URL is configured
    pub runner: Option<Arc<Runner>>,
}

impl Session {
    pub fn open(config: VaporConfig) -> Result<Self> {
        let registry = Arc::new(config.registry());
        let cache = ArtifactCache::new(config.cache.clone());

        let runner = if config.runner.has_model() {
            let runner = Runner::new(config.runner.clone(), cache.clone())?
                .with_registry(Arc::clone(&registry));
            Some(Arc::new(runner))
        } else {
            None
        };

        Ok(Self {
            config,
            registry,
            cache,
            runner,
        })
    }

    /// The runner, for commands that cannot proceed without a model
    pub fn require_runner(&self) -> Result<&Arc<Runner>> {
        self.runner
            .as_ref()
            .ok_or_else(|| anyhow!("no model configured: pass --model or --model-url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_without_model() {
        let session = Session::open(VaporConfig::default()).unwrap();
        assert!(session.runner.is_none());
        assert!(session.require_runner().is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = RunnerArgs {
            model: Some("gpt2".to_string()),
            pipeline_url: Some("http://gen.internal:9000/".to_string()),
            no_cache: true,
            ..Default::default()
        };
        let config = args.load_config().unwrap();

        assert_eq!(config.runner.model.as_deref(), Some("gpt2"));
        assert_eq!(config.runner.pipeline_url, "http://gen.internal:9000/");
        assert!(!config.runner.enable_cache);

        let session = Session::open(config).unwrap();
        assert!(session.require_runner().is_ok());
    }
}
