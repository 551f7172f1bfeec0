//! WebAssembly byte-code engine backend
//!
//! The engine module must export:
//! - `memory`
//! - `load_model(ptr: i32, len: i32)`, called once with the concatenated weights
//! - `run_inference(in_ptr: i32, in_len: i32, out_ptr: i32, out_len: i32)`,
//!   optionally returning the number of output tokens written
//!
//! and may export `alloc(len: i32) -> i32`. Without it the host grows linear
//! memory and places buffers in the new pages. Token ids are little-endian
//! `u32`; lengths passed to `run_inference` count tokens, not bytes.

use async_trait::async_trait;
use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc};

use super::{ArtifactBundle, Backend, BackendKind};
use crate::error::{Error, Result};
use crate::loader::{Artifact, ArtifactRole};

const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Output capacity reserved per call, in tokens, when the input is shorter
const MIN_OUTPUT_TOKENS: usize = 256;

/// Size in bytes of one token id in engine memory
const TOKEN_BYTES: usize = std::mem::size_of::<u32>();

type InferenceArgs = (i32, i32, i32, i32);

enum InferenceEntry {
    /// Returns the number of tokens written
    Counted(TypedFunc<InferenceArgs, i32>),
    /// Writes as many tokens as it was given
    Plain(TypedFunc<InferenceArgs, ()>),
}

#[derive(Debug, Clone, Copy)]
struct Region {
    ptr: usize,
    len: usize,
}

/// Instantiated engine with weights loaded
struct EngineSession {
    store: Store<()>,
    memory: Memory,
    alloc: Option<TypedFunc<i32, i32>>,
    entry: InferenceEntry,
    weights: Region,
    scratch: Option<Region>,
}

/// Runs token ids through an in-process WebAssembly engine
pub struct ByteCodeBackend {
    engine: Engine,
    session: Option<EngineSession>,
}

impl ByteCodeBackend {
    pub fn new() -> Self {
        Self {
            engine: Engine::default(),
            session: None,
        }
    }

    /// Bytes of weights handed to the engine
    pub fn weights_len(&self) -> Option<usize> {
        self.session.as_ref().map(|session| session.weights.len)
    }

    fn instantiate(&self, artifacts: &[Artifact]) -> Result<EngineSession> {
        let (engine_artifact, weight_artifacts) = split_bundle(artifacts)?;

        let module = Module::new(&self.engine, engine_artifact.bytes()).map_err(|e| {
            Error::invalid_artifacts(format!(
                "invalid engine module {}: {:#}",
                engine_artifact.url, e
            ))
        })?;

        let mut store = Store::new(&self.engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| Error::invalid_artifacts(format!("cannot instantiate engine: {:#}", e)))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| Error::invalid_artifacts("engine does not export 'memory'"))?;

        let load_model = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, "load_model")
            .map_err(|e| Error::invalid_artifacts(format!("engine 'load_model': {:#}", e)))?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .ok();

        let entry = match instance.get_typed_func::<InferenceArgs, i32>(&mut store, "run_inference")
        {
            Ok(func) => InferenceEntry::Counted(func),
            Err(_) => instance
                .get_typed_func::<InferenceArgs, ()>(&mut store, "run_inference")
                .map(InferenceEntry::Plain)
                .map_err(|e| {
                    Error::invalid_artifacts(format!("engine 'run_inference': {:#}", e))
                })?,
        };

        let mut session = EngineSession {
            store,
            memory,
            alloc,
            entry,
            weights: Region { ptr: 0, len: 0 },
            scratch: None,
        };

        let weights: Vec<u8> = weight_artifacts
            .iter()
            .flat_map(|artifact| artifact.bytes().iter().copied())
            .collect();
        let region = session.reserve(weights.len())?;
        session.write(region.ptr, &weights)?;
        load_model
            .call(
                &mut session.store,
                (to_wasm(region.ptr)?, to_wasm(region.len)?),
            )
            .map_err(|e| Error::backend(format!("engine 'load_model' failed: {:#}", e)))?;
        session.weights = region;

        tracing::info!(
            "Byte-code engine ready ({} weight shards, {} bytes)",
            weight_artifacts.len(),
            region.len
        );
        Ok(session)
    }
}

impl Default for ByteCodeBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the `[engine, weight, ...]` contract
fn split_bundle(artifacts: &[Artifact]) -> Result<(&Artifact, &[Artifact])> {
    if artifacts.len() < 2 {
        return Err(Error::invalid_artifacts(format!(
            "byte-code engine needs an engine and at least one weight artifact, got {}",
            artifacts.len()
        )));
    }

    let (engine, weights) = artifacts.split_at(1);
    let engine = &engine[0];
    if engine.role != ArtifactRole::Engine {
        return Err(Error::invalid_artifacts(format!(
            "first artifact must be the engine, got {} from {}",
            engine.role, engine.url
        )));
    }
    if let Some(misplaced) = weights.iter().find(|a| a.role != ArtifactRole::Weight) {
        return Err(Error::invalid_artifacts(format!(
            "expected weight at position {}, got {} from {}",
            misplaced.index, misplaced.role, misplaced.url
        )));
    }
    Ok((engine, weights))
}

fn to_wasm(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::backend(format!("{} does not fit the engine address space", value)))
}

fn from_wasm(value: i32) -> usize {
    value as u32 as usize
}

impl EngineSession {
    /// Obtain `len` bytes of engine memory
    fn reserve(&mut self, len: usize) -> Result<Region> {
        if let Some(alloc) = &self.alloc {
            let ptr = alloc
                .call(&mut self.store, to_wasm(len)?)
                .map_err(|e| Error::backend(format!("engine 'alloc' failed: {:#}", e)))?;
            return Ok(Region {
                ptr: from_wasm(ptr),
                len,
            });
        }

        let ptr = self.memory.data_size(&self.store);
        let pages = len.div_ceil(WASM_PAGE_SIZE).max(1);
        self.memory
            .grow(&mut self.store, pages as u64)
            .map_err(|e| Error::backend(format!("cannot grow engine memory: {:#}", e)))?;
        Ok(Region { ptr, len })
    }

    /// Scratch space for `len` bytes, reused across calls when large enough
    fn scratch(&mut self, len: usize) -> Result<Region> {
        match self.scratch {
            Some(region) if region.len >= len => Ok(region),
            _ => {
                let region = self.reserve(len)?;
                self.scratch = Some(region);
                Ok(region)
            }
        }
    }

    fn write(&mut self, ptr: usize, data: &[u8]) -> Result<()> {
        self.memory
            .write(&mut self.store, ptr, data)
            .map_err(|e| Error::backend(format!("engine memory write failed: {}", e)))
    }

    fn read_tokens(&self, ptr: usize, count: usize) -> Result<Vec<u32>> {
        let mut raw = vec![0u8; count * TOKEN_BYTES];
        self.memory
            .read(&self.store, ptr, &mut raw)
            .map_err(|e| Error::backend(format!("engine memory read failed: {}", e)))?;
        Ok(raw
            .chunks_exact(TOKEN_BYTES)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    fn run(&mut self, tokens: &[u32]) -> Result<Vec<u32>> {
        let capacity = tokens.len().max(MIN_OUTPUT_TOKENS);
        let in_bytes = tokens.len() * TOKEN_BYTES;
        let region = self.scratch(in_bytes + capacity * TOKEN_BYTES)?;
        let in_ptr = region.ptr;
        let out_ptr = region.ptr + in_bytes;

        let input: Vec<u8> = tokens.iter().flat_map(|t| t.to_le_bytes()).collect();
        self.write(in_ptr, &input)?;

        let args = (
            to_wasm(in_ptr)?,
            to_wasm(tokens.len())?,
            to_wasm(out_ptr)?,
            to_wasm(capacity)?,
        );

        let written = match &self.entry {
            InferenceEntry::Counted(func) => {
                let written = func
                    .call(&mut self.store, args)
                    .map_err(|e| Error::backend(format!("engine 'run_inference' failed: {:#}", e)))?;
                if written < 0 || written as usize > capacity {
                    return Err(Error::backend(format!(
                        "engine reported {} output tokens for a capacity of {}",
                        written, capacity
                    )));
                }
                written as usize
            }
            InferenceEntry::Plain(func) => {
                func.call(&mut self.store, args)
                    .map_err(|e| Error::backend(format!("engine 'run_inference' failed: {:#}", e)))?;
                tokens.len()
            }
        };

        self.read_tokens(out_ptr, written)
    }
}

#[async_trait]
impl Backend for ByteCodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ByteCodeEngine
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    async fn init(&mut self, bundle: ArtifactBundle) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("byte-code engine is already initialized"));
        }
        let artifacts = match bundle {
            ArtifactBundle::Buffers(artifacts) => artifacts,
            ArtifactBundle::Path { model_path } => {
                return Err(Error::invalid_artifacts(format!(
                    "byte-code engine needs fetched buffers, got path {}",
                    model_path
                )))
            }
        };

        self.session = Some(self.instantiate(&artifacts)?);
        Ok(())
    }

    async fn run_inference(&mut self, tokens: &[u32]) -> Result<Vec<u32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::not_initialized("byte-code engine has not been initialized"))?;
        session.run(tokens)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    /// Adds the sum of all weight bytes to every token
    const SUM_ENGINE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $bias (mut i32) (i32.const 0))
  (func (export "load_model") (param $ptr i32) (param $len i32)
    (local $i i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $len)))
        (global.set $bias
          (i32.add (global.get $bias)
                   (i32.load8_u (i32.add (local.get $ptr) (local.get $i)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next))))
  (func (export "run_inference")
        (param $in i32) (param $in_len i32) (param $out i32) (param $out_len i32)
        (result i32)
    (local $i i32)
    (block $done
      (loop $next
        (br_if $done (i32.ge_u (local.get $i) (local.get $in_len)))
        (i32.store
          (i32.add (local.get $out) (i32.shl (local.get $i) (i32.const 2)))
          (i32.add
            (i32.load (i32.add (local.get $in) (i32.shl (local.get $i) (i32.const 2))))
            (global.get $bias)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (local.get $in_len)))
"#;

    /// Echoes its input and places buffers through its own allocator
    const ECHO_ENGINE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 1024))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $next))
    (global.set $next (i32.add (global.get $next) (local.get $len)))
    (local.get $ptr))
  (func (export "load_model") (param i32 i32))
  (func (export "run_inference")
        (param $in i32) (param $in_len i32) (param $out i32) (param $out_len i32)
    (memory.copy (local.get $out) (local.get $in)
                 (i32.shl (local.get $in_len) (i32.const 2)))))
"#;

    fn artifact(role: ArtifactRole, index: usize, data: impl Into<Bytes>) -> Artifact {
        Artifact {
            role,
            index,
            url: format!("memory://{}", index),
            data: data.into(),
        }
    }

    fn bundle(engine: &'static str, weights: &[&'static [u8]]) -> ArtifactBundle {
        let mut artifacts = vec![artifact(ArtifactRole::Engine, 0, engine.as_bytes())];
        for (i, shard) in weights.iter().enumerate() {
            artifacts.push(artifact(ArtifactRole::Weight, i + 1, *shard));
        }
        ArtifactBundle::Buffers(artifacts)
    }

    #[tokio::test]
    async fn test_counted_entry_point_sees_concatenated_weights() {
        let mut backend = ByteCodeBackend::new();
        backend
            .init(bundle(SUM_ENGINE, &[&[1, 2], &[3]]))
            .await
            .unwrap();
        assert!(backend.is_initialized());
        assert_eq!(backend.weights_len(), Some(3));

        let output = backend.run_inference(&[10, 20, 70000]).await.unwrap();
        assert_eq!(output, vec![16, 26, 70006]);

        // Scratch space is reused across calls
        let output = backend.run_inference(&[1]).await.unwrap();
        assert_eq!(output, vec![7]);
    }

    #[tokio::test]
    async fn test_plain_entry_point_with_engine_allocator() {
        let mut backend = ByteCodeBackend::new();
        backend
            .init(bundle(ECHO_ENGINE, &[b"weights"]))
            .await
            .unwrap();

        let output = backend.run_inference(&[72, 105]).await.unwrap();
        assert_eq!(output, vec![72, 105]);
        assert!(backend.run_inference(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_few_artifacts() {
        let mut backend = ByteCodeBackend::new();
        let only_engine = ArtifactBundle::Buffers(vec![artifact(
            ArtifactRole::Engine,
            0,
            SUM_ENGINE.as_bytes(),
        )]);
        assert!(matches!(
            backend.init(only_engine).await,
            Err(Error::InvalidArtifacts { .. })
        ));
        assert!(matches!(
            backend.init(ArtifactBundle::Buffers(Vec::new())).await,
            Err(Error::InvalidArtifacts { .. })
        ));
        assert!(!backend.is_initialized());
    }

    #[tokio::test]
    async fn test_misordered_artifacts() {
        let mut backend = ByteCodeBackend::new();
        let swapped = ArtifactBundle::Buffers(vec![
            artifact(ArtifactRole::Weight, 0, &b"w"[..]),
            artifact(ArtifactRole::Engine, 1, SUM_ENGINE.as_bytes()),
        ]);
        let err = backend.init(swapped).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArtifacts { .. }));
        assert!(err.to_string().contains("first artifact must be the engine"));
    }

    #[tokio::test]
    async fn test_invalid_engine_bytes() {
        let mut backend = ByteCodeBackend::new();
        let bundle = ArtifactBundle::Buffers(vec![
            artifact(ArtifactRole::Engine, 0, &b"\0asm garbage"[..]),
            artifact(ArtifactRole::Weight, 1, &b"w"[..]),
        ]);
        assert!(matches!(
            backend.init(bundle).await,
            Err(Error::InvalidArtifacts { .. })
        ));
    }

    #[tokio::test]
    async fn test_path_bundle_rejected() {
        let mut backend = ByteCodeBackend::new();
        assert!(matches!(
            backend.init(ArtifactBundle::path("/models/tiny")).await,
            Err(Error::InvalidArtifacts { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_before_init() {
        let mut backend = ByteCodeBackend::new();
        assert!(matches!(
            backend.run_inference(&[1, 2]).await,
            Err(Error::NotInitialized { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_init_rejected() {
        let mut backend = ByteCodeBackend::new();
        backend.init(bundle(SUM_ENGINE, &[&[1]])).await.unwrap();
        assert!(matches!(
            backend.init(bundle(SUM_ENGINE, &[&[2]])).await,
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(backend.run_inference(&[1]).await.unwrap(), vec![2]);
    }
}
