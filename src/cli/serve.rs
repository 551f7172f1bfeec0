//! HTTP server command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use super::{RunnerArgs, Session};
use crate::server::{self, AppState};

/// Start the server, initializing the model first when one is configured
///
/// Without a model the server still hosts the assets directory.
pub async fn serve(
    args: RunnerArgs,
    port: Option<u16>,
    host: Option<String>,
    assets_dir: Option<PathBuf>,
) -> Result<()> {
    let session = Session::open(args.load_config()?)?;

    let mut server_config = session.config.server.clone().unwrap_or_default();
    if let Some(port) = port {
        server_config.port = port;
    }
    if let Some(host) = host {
        server_config.host = host;
    }
    let assets_dir = assets_dir
        .or_else(|| server_config.assets_dir.clone())
        .unwrap_or_else(|| session.config.runner.asset_root.clone());

    // A failed pre-load still starts the server so the assets stay reachable
    match &session.runner {
        Some(runner) => {
            tracing::info!("Pre-loading model");
            match runner.init().await {
                Ok(()) => tracing::info!("Model loaded successfully"),
                Err(e) => tracing::warn!("Model not loaded, completions will fail: {}", e),
            }
        }
        None => tracing::info!("No model configured, serving assets only"),
    }

    let state = Arc::new(AppState::new(
        session.runner.clone(),
        Arc::clone(&session.registry),
        session.cache.clone(),
    ));

    tracing::info!("Starting server at http://{}", server_config.addr());
    server::start(state, server_config, &assets_dir).await?;

    Ok(())
}
