//! HTTP server
//!
//! Serves the runner over a small JSON API and hosts model artifacts
//! (engine modules, weights, manifests) as static files.

mod handlers;
mod routes;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

pub use handlers::{status_code, AppState};
pub use routes::api_routes;

/// Build the application router
///
/// Requests that match no API route are answered from `assets_dir`.
pub fn router(state: Arc<AppState>, config: &ServerConfig, assets_dir: &Path) -> Router {
    let mut app = Router::new()
        .merge(api_routes())
        .fallback_service(ServeDir::new(assets_dir))
        .layer(DefaultBodyLimit::max(config.max_body_size));

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    if config.request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

/// Start the HTTP server
pub async fn start(state: Arc<AppState>, config: ServerConfig, assets_dir: &Path) -> Result<()> {
    let app = router(state, &config, assets_dir);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Serving artifacts from {}", assets_dir.display());
    tracing::info!("API endpoints:");
    tracing::info!("  GET  /health - Health check");
    tracing::info!("  GET  /v1/models - List models");
    tracing::info!("  GET  /v1/status - Runner and cache status");
    tracing::info!("  POST /v1/completions - Text completion");

    axum::serve(listener, app).await?;

    Ok(())
}
