//! vaporllm - Model artifact loading and backend dispatch for LLM inference
//!
//! vaporllm fetches model artifacts (engine modules, weight shards, manifests),
//! shares them through a coalescing cache, and runs text through one of three
//! backends behind a common lifecycle.
//!
//! # Architecture
//!
//! - **loader**: resolves locators, fetches artifacts in order
//! - **cache**: one fetch per URL, shared buffers, bounded LRU
//! - **backend**: byte-code engine (wasmtime), graph session (ONNX Runtime),
//!   generation pipeline (HTTP)
//! - **engine**: the [`Runner`] state machine tying them together
//! - **server** / **cli**: HTTP and command-line surfaces
//!
//! # Example
//!
//! ```bash
//! # Run a prompt through a registry model
//! vaporllm run --model tiny-wasm --base-url http://127.0.0.1:3000 --prompt "Hello"
//!
//! # Host artifacts and serve completions
//! vaporllm serve --model tiny-wasm --asset-root ./assets
//!
//! # List registry models
//! vaporllm list
//! ```

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model;
pub mod server;
pub mod tokenizer;

// Re-export key types
pub use backend::{ArtifactBundle, Backend, BackendFactory, BackendKind, DefaultBackendFactory};
pub use cache::{ArtifactCache, CacheStats};
pub use config::{BackendPreference, CacheConfig, GenerationConfig, RunnerConfig, VaporConfig};
pub use engine::{LoadPlan, Runner, RunnerState, RunnerStatus};
pub use error::{Error, Result};
pub use loader::{Artifact, ArtifactRole, Loader};
pub use model::{ModelDescriptor, ModelRegistry};
