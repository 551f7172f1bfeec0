//! Static model registry
//!
//! Maps model names to descriptors. Built once at startup and shared
//! read-only; lookups have no side effects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{Error, Result};

/// Library a model was packaged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    Transformers,
    Onnx,
    Wasm,
    Llamacpp,
    Mlc,
    Other,
}

impl Library {
    /// Backend variant that runs models of this library
    pub fn backend_kind(self) -> Result<BackendKind> {
        match self {
            Library::Transformers => Ok(BackendKind::GenerationPipeline),
            Library::Onnx => Ok(BackendKind::GraphSession),
            Library::Wasm => Ok(BackendKind::ByteCodeEngine),
            Library::Llamacpp | Library::Mlc | Library::Other => {
                Err(Error::unsupported_backend(self.to_string()))
            }
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Library::Transformers => "transformers",
            Library::Onnx => "onnx",
            Library::Wasm => "wasm",
            Library::Llamacpp => "llamacpp",
            Library::Mlc => "mlc",
            Library::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Immutable description of a known model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key
    pub name: String,
    /// Packaging library, which decides the backend
    pub library: Library,
    /// Model locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Manifest locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, library: Library) -> Self {
        Self {
            name: name.into(),
            library,
            path: None,
            manifest: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.library.backend_kind()
    }
}

/// Name to descriptor table
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled models
    pub fn builtin() -> Self {
        Self::new()
            .with_model(
                ModelDescriptor::new("distilgpt2", Library::Transformers)
                    .with_path("/models/distilgpt2"),
            )
            .with_model(
                ModelDescriptor::new("gpt2", Library::Transformers).with_path("/models/gpt2"),
            )
            .with_model(
                ModelDescriptor::new("onnx-gpt2", Library::Onnx).with_path("/models/onnx/gpt2"),
            )
            .with_model(
                ModelDescriptor::new("llama2-7b", Library::Mlc).with_path("/models/llama2-7b"),
            )
            .with_model(
                ModelDescriptor::new("tiny-wasm", Library::Wasm)
                    .with_path("/models/dummy_tiny_model.bin"),
            )
    }

    /// Add or replace a descriptor
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: ModelDescriptor) {
        self.models.insert(descriptor.name.clone(), descriptor);
    }

    /// Find the descriptor for `name`
    pub fn lookup(&self, name: &str) -> Result<&ModelDescriptor> {
        self.models.get(name).ok_or_else(|| Error::not_found(name))
    }

    /// Descriptors in name order
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Extend<ModelDescriptor> for ModelRegistry {
    fn extend<T: IntoIterator<Item = ModelDescriptor>>(&mut self, iter: T) {
        for descriptor in iter {
            self.insert(descriptor);
        }
    }
}
