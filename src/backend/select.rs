//! Backend auto-selection
//!
//! Checks run in a fixed order over a [`Capabilities`] snapshot and the first
//! match wins. The byte-code engine is checked first and is also the fallback.

use super::BackendKind;
use crate::config::BackendPreference;
use crate::error::{Error, Result};

/// What the host environment can run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// An in-process WebAssembly runtime is available
    pub byte_code_engine: bool,
    pub webgpu: bool,
    pub webgl: bool,
}

impl Capabilities {
    /// Capabilities of the current build and host
    pub fn detect() -> Self {
        Self {
            byte_code_engine: cfg!(feature = "wasm"),
            webgpu: false,
            webgl: false,
        }
    }

    /// No capabilities at all
    pub fn none() -> Self {
        Self::default()
    }
}

type Check = fn(&Capabilities) -> bool;

fn has_byte_code_engine(caps: &Capabilities) -> bool {
    caps.byte_code_engine
}

fn has_webgpu(caps: &Capabilities) -> bool {
    caps.webgpu
}

fn has_webgl(caps: &Capabilities) -> bool {
    caps.webgl
}

const CHECKS: &[(BackendPreference, Check)] = &[
    (BackendPreference::Wasm, has_byte_code_engine),
    (BackendPreference::Webgpu, has_webgpu),
    (BackendPreference::Webgl, has_webgl),
];

/// Resolve `Auto` to a concrete preference; explicit choices pass through
pub fn select_backend(preference: BackendPreference, caps: &Capabilities) -> BackendPreference {
    if preference != BackendPreference::Auto {
        return preference;
    }

    let selected = CHECKS
        .iter()
        .find(|(_, check)| check(caps))
        .map(|(preference, _)| *preference)
        .unwrap_or(BackendPreference::Wasm);

    tracing::debug!("Auto-selected backend: {}", selected);
    selected
}

impl BackendPreference {
    /// Backend variant for this preference, after auto-selection
    pub fn backend_kind(self, caps: &Capabilities) -> Result<BackendKind> {
        match select_backend(self, caps) {
            BackendPreference::Wasm | BackendPreference::Auto => Ok(BackendKind::ByteCodeEngine),
            BackendPreference::Onnx => Ok(BackendKind::GraphSession),
            BackendPreference::Transformers => Ok(BackendKind::GenerationPipeline),
            other @ (BackendPreference::Webgl | BackendPreference::Webgpu) => {
                Err(Error::unsupported_backend(other.to_string()))
            }
        }
    }
}
