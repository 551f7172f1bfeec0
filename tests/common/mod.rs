//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;

use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

/// Echoes its input tokens; weights are ignored
pub const ECHO_ENGINE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "load_model") (param i32 i32))
  (func (export "run_inference")
        (param $in i32) (param $in_len i32) (param $out i32) (param $out_len i32)
        (result i32)
    (memory.copy (local.get $out) (local.get $in)
                 (i32.shl (local.get $in_len) (i32.const 2)))
    (local.get $in_len)))
"#;

/// Bind an ephemeral port on localhost
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

/// Serve `app` on `listener` in the background
pub fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

/// Serve `dir` as static files and return the base URL
pub async fn serve_dir(dir: &Path) -> String {
    let (listener, base) = bind().await;
    serve(listener, static_router(dir));
    base
}

pub fn static_router(dir: &Path) -> Router {
    Router::new().fallback_service(ServeDir::new(dir))
}

/// Temporary asset tree
pub fn assets() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Write `data` at `rel` under `dir`, creating parent directories
pub fn put(dir: &Path, rel: &str, data: impl AsRef<[u8]>) {
    let path = dir.join(rel.trim_start_matches('/'));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}
