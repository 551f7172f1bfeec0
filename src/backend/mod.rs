//! Inference backends
//!
//! Every backend answers the same two calls:
//! - `init` with an [`ArtifactBundle`] (buffers or a model path)
//! - `run_inference` from token ids to token ids
//!
//! Variants:
//! - byte-code engine: a WebAssembly module plus raw weights, run in-process
//! - graph session: a computation graph opened from a model path
//! - generation pipeline: a text-generation service behind a model path

#[cfg(feature = "wasm")]
mod bytecode;
mod graph;
mod pipeline;
mod select;

#[cfg(feature = "wasm")]
pub use bytecode::ByteCodeBackend;
#[cfg(feature = "onnx")]
pub use graph::OrtSessionLoader;
pub use graph::{GraphInput, GraphOutput, GraphSession, GraphSessionBackend, SessionLoader};
pub use pipeline::{
    prompt_from_tokens, GenerationOutput, GenerationPipelineBackend, HttpPipelineLoader,
    PipelineLoader, TextGenerator,
};
pub use select::{select_backend, Capabilities};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::loader::Artifact;

/// Backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    ByteCodeEngine,
    GraphSession,
    GenerationPipeline,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::ByteCodeEngine => "byte-code-engine",
            BackendKind::GraphSession => "graph-session",
            BackendKind::GenerationPipeline => "generation-pipeline",
        }
    }

    /// Whether `init` takes a model path rather than fetched buffers
    pub fn is_path_based(self) -> bool {
        !matches!(self, BackendKind::ByteCodeEngine)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a backend is initialized from
#[derive(Debug, Clone)]
pub enum ArtifactBundle {
    /// Fetched buffers in loader order
    Buffers(Vec<Artifact>),
    /// Path or URL the backend opens itself
    Path { model_path: String },
}

impl ArtifactBundle {
    pub fn path(model_path: impl Into<String>) -> Self {
        Self::Path {
            model_path: model_path.into(),
        }
    }

    /// Model path of a path bundle
    pub fn model_path(&self) -> Option<&str> {
        match self {
            Self::Path { model_path } => Some(model_path),
            Self::Buffers(_) => None,
        }
    }
}

/// A pluggable execution engine
#[async_trait]
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn is_initialized(&self) -> bool;

    /// Prepare the backend. Fails with `InvalidState` if already initialized.
    async fn init(&mut self, bundle: ArtifactBundle) -> Result<()>;

    /// Map input token ids to output token ids
    ///
    /// Fails with `NotInitialized` before a successful `init`. An empty result
    /// means the backend ran and produced nothing.
    async fn run_inference(&mut self, tokens: &[u32]) -> Result<Vec<u32>>;
}

/// Constructs backend instances by kind
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn Backend>>;
}

/// Factory for the backends compiled into this build
pub struct DefaultBackendFactory {
    session_loader: Option<Arc<dyn SessionLoader>>,
    pipeline_loader: Arc<dyn PipelineLoader>,
    generation: GenerationConfig,
}

impl DefaultBackendFactory {
    /// Create a factory whose pipelines use `fetch_timeout` per request
    pub fn new(generation: GenerationConfig, fetch_timeout: std::time::Duration) -> Result<Self> {
        Ok(Self {
            session_loader: default_session_loader(),
            pipeline_loader: Arc::new(HttpPipelineLoader::new(fetch_timeout)?),
            generation,
        })
    }

    /// Open graph sessions with `loader`
    pub fn with_session_loader(mut self, loader: Arc<dyn SessionLoader>) -> Self {
        self.session_loader = Some(loader);
        self
    }

    /// Open generation pipelines with `loader`
    pub fn with_pipeline_loader(mut self, loader: Arc<dyn PipelineLoader>) -> Self {
        self.pipeline_loader = loader;
        self
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }
}

#[cfg(feature = "onnx")]
fn default_session_loader() -> Option<Arc<dyn SessionLoader>> {
    Some(Arc::new(OrtSessionLoader::new()))
}

#[cfg(not(feature = "onnx"))]
fn default_session_loader() -> Option<Arc<dyn SessionLoader>> {
    None
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn Backend>> {
        match kind {
            #[cfg(feature = "wasm")]
            BackendKind::ByteCodeEngine => Ok(Box::new(ByteCodeBackend::new())),
            #[cfg(not(feature = "wasm"))]
            BackendKind::ByteCodeEngine => Err(Error::unsupported_backend(format!(
                "{} (built without the 'wasm' feature)",
                kind
            ))),
            BackendKind::GraphSession => match &self.session_loader {
                Some(loader) => Ok(Box::new(GraphSessionBackend::new(Arc::clone(loader)))),
                None => Err(Error::unsupported_backend(format!(
                    "{} (built without the 'onnx' feature)",
                    kind
                ))),
            },
            BackendKind::GenerationPipeline => Ok(Box::new(GenerationPipelineBackend::new(
                Arc::clone(&self.pipeline_loader),
                self.generation.clone(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn factory() -> DefaultBackendFactory {
        DefaultBackendFactory::new(GenerationConfig::default(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(BackendKind::ByteCodeEngine.to_string(), "byte-code-engine");
        assert!(!BackendKind::ByteCodeEngine.is_path_based());
        assert!(BackendKind::GraphSession.is_path_based());
        assert_eq!(
            serde_json::to_string(&BackendKind::GenerationPipeline).unwrap(),
            "\"generation-pipeline\""
        );
    }

    #[test]
    fn test_factory_builds_requested_kind() {
        let factory = factory();
        let pipeline = factory.create(BackendKind::GenerationPipeline).unwrap();
        assert_eq!(pipeline.kind(), BackendKind::GenerationPipeline);
        assert!(!pipeline.is_initialized());
    }

    #[cfg(feature = "wasm")]
    #[test]
    fn test_factory_builds_byte_code_engine() {
        let backend = factory().create(BackendKind::ByteCodeEngine).unwrap();
        assert_eq!(backend.kind(), BackendKind::ByteCodeEngine);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_graph_session_needs_feature() {
        let err = factory().create(BackendKind::GraphSession).err().unwrap();
        assert!(matches!(err, Error::UnsupportedBackend { .. }));
    }

    #[test]
    fn test_bundle_model_path() {
        assert_eq!(
            ArtifactBundle::path("/models/gpt2").model_path(),
            Some("/models/gpt2")
        );
        assert!(ArtifactBundle::Buffers(Vec::new()).model_path().is_none());
    }
}
