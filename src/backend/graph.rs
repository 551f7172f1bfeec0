//! Graph-session backend
//!
//! Token ids go in as a rank-2 `i64` tensor `[1, sequence_length]` under the
//! input name `input_ids`; the `logits` output is reduced to one token per
//! position by argmax. A session that does not produce the expected output
//! yields an empty result.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ArtifactBundle, Backend, BackendKind};
use crate::error::{Error, Result};

#[cfg(feature = "onnx")]
pub use self::onnx::OrtSessionLoader;

const DEFAULT_INPUT_NAME: &str = "input_ids";
const DEFAULT_OUTPUT_NAME: &str = "logits";

/// Input tensor
#[derive(Debug, Clone, PartialEq)]
pub struct GraphInput {
    pub shape: [usize; 2],
    pub data: Vec<i64>,
}

/// Output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOutput {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// An opened computation graph
pub trait GraphSession: Send {
    /// Execute the graph. Returns `None` when `output_name` is not produced.
    fn run(
        &mut self,
        input_name: &str,
        input: GraphInput,
        output_name: &str,
    ) -> Result<Option<GraphOutput>>;
}

/// Opens graph sessions from a model path
#[async_trait]
pub trait SessionLoader: Send + Sync {
    async fn open(&self, model_path: &str) -> Result<Box<dyn GraphSession>>;
}

pub struct GraphSessionBackend {
    loader: Arc<dyn SessionLoader>,
    session: Option<Box<dyn GraphSession>>,
    input_name: String,
    output_name: String,
}

impl GraphSessionBackend {
    pub fn new(loader: Arc<dyn SessionLoader>) -> Self {
        Self {
            loader,
            session: None,
            input_name: DEFAULT_INPUT_NAME.to_string(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }

    /// Use different tensor names
    pub fn with_names(mut self, input_name: impl Into<String>, output_name: impl Into<String>) -> Self {
        self.input_name = input_name.into();
        self.output_name = output_name.into();
        self
    }
}

/// Index of the largest score in each row of the last dimension
fn argmax_rows(output: &GraphOutput) -> Result<Vec<u32>> {
    let width = match output.shape.last() {
        Some(&width) if width > 0 => width as usize,
        _ => return Ok(Vec::new()),
    };
    if output.data.len() % width != 0 {
        return Err(Error::invalid_response(format!(
            "output of {} values does not match shape {:?}",
            output.data.len(),
            output.shape
        )));
    }

    Ok(output
        .data
        .chunks_exact(width)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &score)| {
                    if score > best.1 {
                        (i, score)
                    } else {
                        best
                    }
                })
                .0 as u32
        })
        .collect())
}

#[async_trait]
impl Backend for GraphSessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GraphSession
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    async fn init(&mut self, bundle: ArtifactBundle) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("graph session is already initialized"));
        }
        let model_path = bundle.model_path().ok_or_else(|| {
            Error::invalid_artifacts("graph session needs a model path, got fetched buffers")
        })?;

        self.session = Some(self.loader.open(model_path).await?);
        tracing::info!("Graph session opened from {}", model_path);
        Ok(())
    }

    async fn run_inference(&mut self, tokens: &[u32]) -> Result<Vec<u32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::not_initialized("graph session has not been initialized"))?;

        let input = GraphInput {
            shape: [1, tokens.len()],
            data: tokens.iter().map(|&t| i64::from(t)).collect(),
        };

        match session.run(&self.input_name, input, &self.output_name)? {
            Some(output) => argmax_rows(&output),
            None => {
                tracing::warn!(
                    "Graph session produced no '{}' output; returning empty result",
                    self.output_name
                );
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Value;

    use super::{GraphInput, GraphOutput, GraphSession, SessionLoader};
    use crate::error::{Error, Result};

    const MODEL_FILE: &str = "model.onnx";

    /// Opens `<model_path>/model.onnx` with ONNX Runtime
    #[derive(Debug, Default)]
    pub struct OrtSessionLoader;

    impl OrtSessionLoader {
        pub fn new() -> Self {
            Self
        }
    }

    fn model_file(model_path: &str) -> Result<PathBuf> {
        if model_path.contains("://") {
            return Err(Error::invalid_artifacts(format!(
                "graph session needs a local model path, got {}",
                model_path
            )));
        }
        let path = Path::new(model_path);
        if path.extension().is_some_and(|ext| ext == "onnx") {
            Ok(path.to_path_buf())
        } else {
            Ok(path.join(MODEL_FILE))
        }
    }

    struct OrtSession {
        session: Session,
    }

    impl GraphSession for OrtSession {
        fn run(
            &mut self,
            input_name: &str,
            input: GraphInput,
            output_name: &str,
        ) -> Result<Option<GraphOutput>> {
            let array = ndarray::Array2::from_shape_vec((input.shape[0], input.shape[1]), input.data)
                .map_err(|e| Error::backend(format!("Failed to create input array: {}", e)))?;
            let tensor = Value::from_array(array)
                .map_err(|e| Error::backend(format!("Failed to create input tensor: {}", e)))?;

            let outputs = self
                .session
                .run(ort::inputs![input_name => tensor])
                .map_err(|e| Error::backend(format!("Inference failed: {}", e)))?;

            let Some(output) = outputs.get(output_name) else {
                return Ok(None);
            };
            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::backend(format!("Failed to extract '{}': {}", output_name, e)))?;

            Ok(Some(GraphOutput {
                shape: shape.iter().copied().collect(),
                data: data.to_vec(),
            }))
        }
    }

    #[async_trait]
    impl SessionLoader for OrtSessionLoader {
        async fn open(&self, model_path: &str) -> Result<Box<dyn GraphSession>> {
            let file = model_file(model_path)?;
            let session = tokio::task::spawn_blocking(move || {
                Session::builder()
                    .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
                    .and_then(|builder| builder.commit_from_file(&file))
                    .map_err(|e| {
                        Error::invalid_artifacts(format!(
                            "Failed to load ONNX model {}: {}",
                            file.display(),
                            e
                        ))
                    })
            })
            .await
            .map_err(|e| Error::backend(format!("session loader task failed: {}", e)))??;

            Ok(Box::new(OrtSession { session }))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_model_file() {
            assert_eq!(
                model_file("/models/onnx/gpt2").unwrap(),
                PathBuf::from("/models/onnx/gpt2/model.onnx")
            );
            assert_eq!(
                model_file("/models/custom.onnx").unwrap(),
                PathBuf::from("/models/custom.onnx")
            );
            assert!(model_file("http://host/models/onnx/gpt2").is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct FixedSession {
        output: Option<GraphOutput>,
        seen: Arc<Mutex<Vec<(String, GraphInput)>>>,
    }

    impl GraphSession for FixedSession {
        fn run(
            &mut self,
            input_name: &str,
            input: GraphInput,
            output_name: &str,
        ) -> Result<Option<GraphOutput>> {
            self.seen.lock().push((input_name.to_string(), input));
            Ok(self.output.clone().filter(|_| output_name == "logits"))
        }
    }

    struct FixedLoader {
        output: Option<GraphOutput>,
        seen: Arc<Mutex<Vec<(String, GraphInput)>>>,
    }

    #[async_trait]
    impl SessionLoader for FixedLoader {
        async fn open(&self, model_path: &str) -> Result<Box<dyn GraphSession>> {
            if model_path.is_empty() {
                return Err(Error::invalid_artifacts("empty model path"));
            }
            Ok(Box::new(FixedSession {
                output: self.output.clone(),
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    fn backend(output: Option<GraphOutput>) -> (GraphSessionBackend, Arc<Mutex<Vec<(String, GraphInput)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let loader = FixedLoader {
            output,
            seen: Arc::clone(&seen),
        };
        (GraphSessionBackend::new(Arc::new(loader)), seen)
    }

    fn logits() -> GraphOutput {
        GraphOutput {
            shape: vec![1, 2, 3],
            data: vec![0.1, 0.7, 0.2, 2.0, -1.0, 1.5],
        }
    }

    #[tokio::test]
    async fn test_argmax_per_position() {
        let (mut backend, seen) = backend(Some(logits()));
        backend
            .init(ArtifactBundle::path("/models/onnx/gpt2"))
            .await
            .unwrap();

        let output = backend.run_inference(&[5, 9]).await.unwrap();
        assert_eq!(output, vec![1, 0]);

        let seen = seen.lock();
        assert_eq!(seen[0].0, "input_ids");
        assert_eq!(seen[0].1.shape, [1, 2]);
        assert_eq!(seen[0].1.data, vec![5i64, 9]);
    }

    #[tokio::test]
    async fn test_missing_output_is_empty() {
        let (backend, _) = backend(Some(logits()));
        let mut backend = backend.with_names("input_ids", "last_hidden_state");
        backend
            .init(ArtifactBundle::path("/models/onnx/gpt2"))
            .await
            .unwrap();

        assert!(backend.run_inference(&[1, 2, 3]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let (mut backend, _) = backend(None);
        assert!(matches!(
            backend.run_inference(&[1]).await,
            Err(Error::NotInitialized { .. })
        ));
        assert!(matches!(
            backend.init(ArtifactBundle::Buffers(Vec::new())).await,
            Err(Error::InvalidArtifacts { .. })
        ));

        backend
            .init(ArtifactBundle::path("/models/onnx/gpt2"))
            .await
            .unwrap();
        assert!(matches!(
            backend.init(ArtifactBundle::path("/models/onnx/gpt2")).await,
            Err(Error::InvalidState { .. })
        ));
        assert!(backend.run_inference(&[1]).await.unwrap().is_empty());
    }

    #[test]
    fn test_argmax_shape_mismatch() {
        let output = GraphOutput {
            shape: vec![1, 1, 4],
            data: vec![0.0; 6],
        };
        assert!(matches!(
            argmax_rows(&output),
            Err(Error::InvalidResponse { .. })
        ));
        let empty = GraphOutput {
            shape: vec![],
            data: vec![],
        };
        assert!(argmax_rows(&empty).unwrap().is_empty());
    }
}
