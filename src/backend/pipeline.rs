//! Generation-pipeline backend
//!
//! Token ids are turned back into a prompt, handed to a text-generation
//! pipeline, and the generated text is returned as UTF-8 byte ids.
//!
//! The bundled [`HttpPipelineLoader`] talks to a text-generation endpoint
//! using the Hugging Face inference wire shape:
//!
//! ```json
//! { "inputs": "User prompt: Hello", "parameters": { "max_new_tokens": 30, "temperature": 0.8, "top_p": 0.95 } }
//! ```
//!
//! answered by `[{ "generated_text": "..." }]`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{ArtifactBundle, Backend, BackendKind};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};

const PROMPT_PREFIX: &str = "User prompt: ";

/// Something that continues a prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run generation and return the raw, unvalidated result
    async fn generate(&self, prompt: &str, params: &GenerationConfig) -> Result<Value>;
}

/// Opens a text generator for a model path or identifier
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn open(&self, model_path: &str) -> Result<Box<dyn TextGenerator>>;
}

/// First element of a generation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub generated_text: String,
}

impl GenerationOutput {
    /// Validate a raw generation result
    ///
    /// Anything other than a non-empty array yields `None`. A first element
    /// without `generated_text` is an `InvalidResponse`.
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let Value::Array(items) = value else {
            return Ok(None);
        };
        let Some(first) = items.into_iter().next() else {
            return Ok(None);
        };
        serde_json::from_value(first)
            .map(Some)
            .map_err(|e| Error::invalid_response(format!("unexpected generation result: {}", e)))
    }
}

/// Best-effort prompt for token ids
///
/// Printable ASCII ids pass through; anything else maps onto `A..=Z`.
pub fn prompt_from_tokens(tokens: &[u32]) -> String {
    let body: String = tokens
        .iter()
        .map(|&id| match char::from_u32(id) {
            Some(c) if c.is_ascii_graphic() || c == ' ' => c,
            _ => char::from(b'A' + (id % 26) as u8),
        })
        .collect();
    format!("{}{}", PROMPT_PREFIX, body)
}

pub struct GenerationPipelineBackend {
    loader: Arc<dyn PipelineLoader>,
    params: GenerationConfig,
    generator: Option<Box<dyn TextGenerator>>,
}

impl GenerationPipelineBackend {
    pub fn new(loader: Arc<dyn PipelineLoader>, params: GenerationConfig) -> Self {
        Self {
            loader,
            params,
            generator: None,
        }
    }

    pub fn params(&self) -> &GenerationConfig {
        &self.params
    }
}

#[async_trait]
impl Backend for GenerationPipelineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GenerationPipeline
    }

    fn is_initialized(&self) -> bool {
        self.generator.is_some()
    }

    async fn init(&mut self, bundle: ArtifactBundle) -> Result<()> {
        if self.generator.is_some() {
            return Err(Error::invalid_state(
                "generation pipeline is already initialized",
            ));
        }
        let model_path = bundle.model_path().ok_or_else(|| {
            Error::invalid_artifacts("generation pipeline needs a model path, got fetched buffers")
        })?;

        self.generator = Some(self.loader.open(model_path).await?);
        tracing::info!("Generation pipeline loaded from {}", model_path);
        Ok(())
    }

    async fn run_inference(&mut self, tokens: &[u32]) -> Result<Vec<u32>> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            Error::not_initialized("generation pipeline has not been initialized")
        })?;

        let prompt = prompt_from_tokens(tokens);
        tracing::debug!("Generating from prompt: {:?}", prompt);

        let raw = generator.generate(&prompt, &self.params).await?;
        match GenerationOutput::from_value(raw)? {
            Some(output) => Ok(output.generated_text.bytes().map(u32::from).collect()),
            None => {
                tracing::warn!("Generation result was not a non-empty array; returning empty result");
                Ok(Vec::new())
            }
        }
    }
}

/// Pipeline loader for HTTP text-generation endpoints
pub struct HttpPipelineLoader {
    client: reqwest::Client,
}

impl HttpPipelineLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PipelineLoader for HttpPipelineLoader {
    async fn open(&self, model_path: &str) -> Result<Box<dyn TextGenerator>> {
        let endpoint = Url::parse(model_path)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| {
                Error::invalid_artifacts(format!(
                    "generation pipeline needs an http(s) endpoint, got {}",
                    model_path
                ))
            })?;

        Ok(Box::new(HttpTextGenerator {
            client: self.client.clone(),
            endpoint,
        }))
    }
}

struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    parameters: &'a GenerationConfig,
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationConfig) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .json(&GenerationRequest {
                inputs: prompt,
                parameters: params,
            })
            .send()
            .await
            .map_err(|e| Error::backend(format!("generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::backend(format!(
                "generation endpoint {} answered HTTP {}",
                self.endpoint,
                status.as_u16()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::invalid_response(format!("generation result is not JSON: {}", e)))
    }
}
