//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::cache::{ArtifactCache, CacheStats};
use crate::engine::{Runner, RunnerStatus};
use crate::error::Error;
use crate::model::ModelRegistry;

/// Shared application state
///
/// Without a runner the server only hosts artifacts; completions answer 503.
pub struct AppState {
    pub runner: Option<Arc<Runner>>,
    pub registry: Arc<ModelRegistry>,
    pub cache: ArtifactCache,
}

impl AppState {
    pub fn new(
        runner: Option<Arc<Runner>>,
        registry: Arc<ModelRegistry>,
        cache: ArtifactCache,
    ) -> Self {
        Self {
            runner,
            registry,
            cache,
        }
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// List registry models
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = ModelsResponse {
        object: "list".to_string(),
        data: state
            .registry
            .iter()
            .map(|descriptor| ModelInfo {
                id: descriptor.name.clone(),
                object: "model".to_string(),
                created: 0,
                owned_by: descriptor.library.to_string(),
                backend: descriptor
                    .backend_kind()
                    .ok()
                    .map(|kind| kind.to_string()),
            })
            .collect(),
    };
    (StatusCode::OK, Json(response))
}

/// Runner lifecycle and cache statistics
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = StatusResponse {
        runner: state.runner.as_ref().map(|runner| runner.status()),
        cache: state.cache.stats(),
    };
    (StatusCode::OK, Json(response))
}

/// Text completion endpoint
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let Some(runner) = &state.runner else {
        return error_response(&Error::not_initialized("no model is configured"));
    };

    let status = runner.status();
    if let (Some(requested), Some(served)) = (&request.model, &status.model) {
        if requested != served {
            return error_response(&Error::not_found(requested.clone()));
        }
    }

    match runner.run_inference(&request.prompt).await {
        Ok(text) => {
            let response = CompletionResponse {
                id: format!("cmpl-{}", uuid::Uuid::new_v4()),
                object: "text_completion".to_string(),
                created: chrono::Utc::now().timestamp(),
                model: status.model.unwrap_or_default(),
                choices: vec![CompletionChoice {
                    text,
                    index: 0,
                    finish_reason: "stop".to_string(),
                }],
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// HTTP status for a library error
pub fn status_code(error: &Error) -> StatusCode {
    match error {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::NotInitialized { .. } | Error::InvalidState { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Load { .. } | Error::InvalidResponse { .. } => StatusCode::BAD_GATEWAY,
        Error::Tokenizer { .. } => StatusCode::BAD_REQUEST,
        Error::UnsupportedBackend { .. }
        | Error::BackendExecution { .. }
        | Error::InvalidArtifacts { .. }
        | Error::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> Response {
    let status = status_code(error);
    let r#type = if status.is_client_error() {
        "invalid_request_error"
    } else {
        "server_error"
    };
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: error.to_string(),
                r#type: r#type.to_string(),
            },
        }),
    )
        .into_response()
}

// Request/Response types

#[derive(Deserialize)]
pub struct CompletionRequest {
    /// Must match the served model when given
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: usize,
    pub finish_reason: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    /// `null` when no model is configured
    pub runner: Option<RunnerStatus>,
    pub cache: CacheStats,
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}
