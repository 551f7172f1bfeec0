//! Inference runner
//!
//! Owns a [`Loader`] and at most one active [`Backend`], and drives them
//! through the lifecycle in [`RunnerState`]. Inference calls on one runner
//! are serialized.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::plan::{FetchPlan, LoadPlan};
use super::state::{transition, RunnerState, RunnerStatus, StateGuard};
use crate::backend::{
    ArtifactBundle, Backend, BackendFactory, BackendKind, Capabilities, DefaultBackendFactory,
};
use crate::cache::ArtifactCache;
use crate::config::{ModelSelection, RunnerConfig};
use crate::error::{Error, Result};
use crate::loader::{Artifact, DefaultFetcher, Fetcher, Loader, SourceResolver};
use crate::model::ModelRegistry;
use crate::tokenizer::{ByteTokenizer, Tokenizer};

/// State guarded by the inference lock
struct RunnerInner {
    loader: Loader,
    backend: Option<Box<dyn Backend>>,
}

/// Loads a model and runs text through it
pub struct Runner {
    config: RunnerConfig,
    resolver: SourceResolver,
    /// Resolves generation-pipeline model paths
    pipeline_resolver: SourceResolver,
    cache: Option<ArtifactCache>,
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn BackendFactory>,
    tokenizer: Arc<dyn Tokenizer>,
    capabilities: Capabilities,
    state: RwLock<RunnerState>,
    active: RwLock<Option<LoadPlan>>,
    /// Loader sequence length, readable without the inference lock
    artifact_count: AtomicUsize,
    inner: tokio::sync::Mutex<RunnerInner>,
}

impl Runner {
    /// Create a runner for `config`, fetching through `cache` when the
    /// config enables caching
    ///
    /// Fails with a configuration error if the config does not name exactly
    /// one model source.
    pub fn new(config: RunnerConfig, cache: ArtifactCache) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        let resolver = SourceResolver::from_config(config.base_url.as_deref(), &config.asset_root)?;
        let pipeline_origin = config
            .base_url
            .as_deref()
            .unwrap_or(config.pipeline_url.as_str());
        let pipeline_resolver =
            SourceResolver::from_config(Some(pipeline_origin), &config.asset_root)?;
        let cache = config.enable_cache.then_some(cache);
        let fetcher: Arc<dyn Fetcher> = Arc::new(DefaultFetcher::new(timeout)?);
        let factory = DefaultBackendFactory::new(config.generation.clone(), timeout)?;

        Ok(Self {
            inner: tokio::sync::Mutex::new(RunnerInner {
                loader: Loader::new(fetcher, resolver.clone(), cache.clone()),
                backend: None,
            }),
            config,
            resolver,
            pipeline_resolver,
            cache,
            registry: Arc::new(ModelRegistry::builtin()),
            factory: Arc::new(factory),
            tokenizer: Arc::new(ByteTokenizer::new()),
            capabilities: Capabilities::detect(),
            state: RwLock::new(RunnerState::Uninitialized),
            active: RwLock::new(None),
            artifact_count: AtomicUsize::new(0),
        })
    }

    /// Look models up in `registry` instead of the built-in table
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Fetch artifacts with `fetcher`
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.inner.get_mut().loader =
            Loader::new(fetcher, self.resolver.clone(), self.cache.clone());
        self
    }

    /// Construct backends with `factory`
    pub fn with_backends(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Auto-select against `capabilities` instead of the detected ones
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn state(&self) -> RunnerState {
        *self.state.read()
    }

    /// Backend variant in use once initialized
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.active.read().as_ref().map(|plan| plan.kind)
    }

    /// Work out what `init` will do
    ///
    /// Resolves the model through the registry (registry mode) or the backend
    /// preference (direct mode). Nothing is fetched.
    ///
    /// Path-based backends fetch nothing in registry mode; in direct mode the
    /// model locator itself is fetched before the backend opens its path.
    pub fn plan(&self) -> Result<LoadPlan> {
        let (model, kind, source, manifest, direct) = match self.config.selection()? {
            ModelSelection::Registry(name) => {
                let descriptor = self.registry.lookup(name)?;
                (
                    descriptor.name.clone(),
                    descriptor.backend_kind()?,
                    descriptor.path.clone(),
                    descriptor
                        .manifest
                        .clone()
                        .or_else(|| self.config.manifest_url.clone()),
                    false,
                )
            }
            ModelSelection::Direct { model_url, backend } => (
                model_url.to_string(),
                backend.backend_kind(&self.capabilities)?,
                Some(model_url.to_string()),
                self.config.manifest_url.clone(),
                true,
            ),
        };

        let fetch = match (manifest, kind.is_path_based()) {
            (Some(manifest), _) => FetchPlan::Manifest { manifest },
            (None, true) => match source.clone().filter(|_| direct) {
                Some(model) => FetchPlan::Model { model },
                None => FetchPlan::Nothing,
            },
            (None, false) => {
                let model_url = source.clone().ok_or_else(|| {
                    Error::config(format!("model '{}' has neither a path nor a manifest", model))
                })?;
                FetchPlan::EngineAndModel {
                    engine: self.config.engine_url.clone(),
                    model: model_url,
                }
            }
        };

        let model_path = if kind.is_path_based() {
            let source = source.ok_or_else(|| {
                Error::config(format!("model '{}' needs a path for the {} backend", model, kind))
            })?;
            let resolver = match kind {
                BackendKind::GenerationPipeline => &self.pipeline_resolver,
                _ => &self.resolver,
            };
            Some(SourceResolver::model_path(&resolver.resolve(&source)?))
        } else {
            None
        };

        Ok(LoadPlan {
            model,
            kind,
            fetch,
            model_path,
        })
    }

    /// Load artifacts and bring up the backend
    ///
    /// A no-op once Ready. From Uninitialized or Failed, moves through
    /// Loading to Ready, or to Failed with the error that stopped it.
    pub async fn init(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match self.state() {
            RunnerState::Ready => return Ok(()),
            state @ (RunnerState::Loading | RunnerState::Running) => {
                return Err(Error::invalid_state(format!(
                    "cannot initialize while {}",
                    state
                )))
            }
            RunnerState::Uninitialized | RunnerState::Failed => {}
        }

        let mut guard = StateGuard::enter(&self.state, RunnerState::Loading, RunnerState::Failed);
        let loaded = self.load(&mut inner).await;
        self.artifact_count
            .store(inner.loader.artifacts().len(), Ordering::Release);
        match loaded {
            Ok(plan) => {
                tracing::info!("Runner ready: {} on {}", plan.model, plan.kind);
                *self.active.write() = Some(plan);
                guard.exit_to(RunnerState::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Runner init failed: {}", e);
                inner.backend = None;
                *self.active.write() = None;
                Err(e)
            }
        }
    }

    async fn load(&self, inner: &mut RunnerInner) -> Result<LoadPlan> {
        let plan = self.plan()?;
        tracing::info!("Initializing {} with the {} backend", plan.model, plan.kind);

        inner.loader.clear_artifacts();
        match &plan.fetch {
            FetchPlan::EngineAndModel { engine, model } => {
                inner.loader.load_engine(engine).await?;
                inner.loader.load_model(model).await?;
            }
            FetchPlan::Manifest { manifest } => {
                inner.loader.load_from_manifest(manifest).await?;
            }
            FetchPlan::Model { model } => {
                inner.loader.load_model(model).await?;
            }
            FetchPlan::Nothing => {}
        }

        let bundle = match &plan.model_path {
            Some(model_path) => ArtifactBundle::path(model_path.clone()),
            None => ArtifactBundle::Buffers(inner.loader.artifacts().to_vec()),
        };

        let mut backend = self.factory.create(plan.kind)?;
        backend.init(bundle).await?;
        inner.backend = Some(backend);

        Ok(plan)
    }

    /// Run `input` through the backend and return the decoded output
    ///
    /// Requires Ready. Concurrent calls wait their turn. A backend failure is
    /// reported as `BackendExecution` and leaves the runner Ready.
    pub async fn run_inference(&self, input: &str) -> Result<String> {
        let state = self.state();
        if !state.accepts_inference() {
            return Err(Error::not_initialized(format!(
                "runner is {}; call init() first",
                state
            )));
        }

        let mut inner = self.inner.lock().await;
        let backend = match (self.state(), inner.backend.as_mut()) {
            (RunnerState::Ready, Some(backend)) => backend,
            (state, _) => {
                return Err(Error::not_initialized(format!(
                    "runner is {}; call init() first",
                    state
                )))
            }
        };

        let _running = StateGuard::enter(&self.state, RunnerState::Running, RunnerState::Ready);

        let tokens = self.tokenizer.tokenize(input)?;
        tracing::debug!("Running inference on {} tokens", tokens.len());

        let output = backend
            .run_inference(&tokens)
            .await
            .map_err(execution_error)?;

        self.tokenizer.detokenize(&output)
    }

    /// Artifacts fetched by the last `init`, in load order
    pub async fn artifacts(&self) -> Vec<Artifact> {
        self.inner.lock().await.loader.artifacts().to_vec()
    }

    /// Lifecycle snapshot; never waits on a pending `init` or inference
    pub fn status(&self) -> RunnerStatus {
        let artifacts = self.artifact_count.load(Ordering::Acquire);
        let active = self.active.read().clone();
        RunnerStatus {
            state: self.state(),
            model: active
                .as_ref()
                .map(|plan| plan.model.clone())
                .or_else(|| self.config.model.clone())
                .or_else(|| self.config.model_url.clone()),
            backend: active.map(|plan| plan.kind),
            artifacts,
        }
    }

    /// Drop the backend and artifacts and return to Uninitialized
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.backend = None;
        inner.loader.clear_artifacts();
        self.artifact_count.store(0, Ordering::Release);
        *self.active.write() = None;
        transition(&self.state, RunnerState::Uninitialized);
    }
}

/// Backend failures surface as `BackendExecution`; typed outcomes pass through
fn execution_error(error: Error) -> Error {
    match error {
        Error::BackendExecution { .. }
        | Error::InvalidResponse { .. }
        | Error::NotInitialized { .. } => error,
        other => Error::backend(other.to_string()),
    }
}
