//! Error types for vaporllm
//!
//! Every fallible library operation returns [`Result`]. The error is `Clone`
//! so that a single failed fetch can be handed to every coalesced waiter.

use thiserror::Error;

use crate::loader::ArtifactRole;

/// Main error type for vaporllm operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Unknown model name or descriptor
    #[error("Model not found: {name}")]
    NotFound { name: String },

    /// Artifact fetch failed (non-success response, transport or I/O error)
    #[error("Failed to load {role} from {url}: {message}")]
    Load {
        url: String,
        role: ArtifactRole,
        message: String,
    },

    /// Selected or detected backend has no implementation in this build
    #[error("Unsupported backend: {backend}")]
    UnsupportedBackend { backend: String },

    /// Lifecycle-gated operation called before a successful init
    #[error("Not initialized: {message}")]
    NotInitialized { message: String },

    /// Opaque failure from inside a backend call
    #[error("Backend execution failed: {message}")]
    BackendExecution { message: String },

    /// Artifact bundle does not satisfy the backend's init contract
    #[error("Invalid artifacts: {message}")]
    InvalidArtifacts { message: String },

    /// Backend result did not have the expected shape
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Tokenizer failure
    #[error("Tokenizer error: {message}")]
    Tokenizer { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn load(url: impl Into<String>, role: ArtifactRole, message: impl Into<String>) -> Self {
        Self::Load {
            url: url.into(),
            role,
            message: message.into(),
        }
    }

    pub fn unsupported_backend(backend: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend: backend.into(),
        }
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::NotInitialized {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendExecution {
            message: message.into(),
        }
    }

    pub fn invalid_artifacts(message: impl Into<String>) -> Self {
        Self::InvalidArtifacts {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn tokenizer(message: impl Into<String>) -> Self {
        Self::Tokenizer {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from a fetch
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. })
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_names_url_and_role() {
        let err = Error::load("http://host/models/a.bin", ArtifactRole::Weight, "HTTP 404");
        let msg = err.to_string();
        assert!(msg.contains("http://host/models/a.bin"));
        assert!(msg.contains("weight"));
        assert!(msg.contains("HTTP 404"));
        assert!(err.is_load());
    }

    #[test]
    fn test_errors_are_comparable_after_clone() {
        let err = Error::not_initialized("runner");
        assert_eq!(err.clone(), err);
        assert!(!err.is_load());
    }
}
