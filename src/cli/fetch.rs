//! Download a manifest's artifacts

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use url::Url;

use crate::config::ASSET_DIR_ENV;
use crate::loader::{Artifact, DefaultFetcher, Loader, SourceResolver};

/// Fetch every entry of `manifest` and write it into `output`
pub async fn fetch(manifest: String, output: PathBuf, base_url: Option<String>) -> Result<()> {
    let asset_root = std::env::var(ASSET_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let resolver = SourceResolver::from_config(base_url.as_deref(), &asset_root)?;
    let fetcher = Arc::new(DefaultFetcher::new(Duration::from_secs(300))?);
    let mut loader = Loader::new(fetcher, resolver, None);

    println!("Fetching manifest: {}", manifest);
    let count = loader.load_from_manifest(&manifest).await?;

    let written = write_artifacts(loader.artifacts(), &output).await?;
    for (artifact, path) in loader.artifacts().iter().zip(&written) {
        println!(
            "  {} {} ({})",
            artifact.role,
            path.display(),
            format_size(artifact.len())
        );
    }
    println!("Downloaded {} artifacts to: {}", count, output.display());

    Ok(())
}

/// Write artifacts into `dir`, named after the last segment of their URL
///
/// A name already taken by an earlier artifact gets its manifest index as a
/// prefix, so shards with the same file name never overwrite each other.
pub async fn write_artifacts(artifacts: &[Artifact], dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut taken = HashSet::new();
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let mut name = file_name(artifact);
        if !taken.insert(name.clone()) {
            name = format!("{}-{}", artifact.index, name);
            taken.insert(name.clone());
        }
        let path = dir.join(name);
        tokio::fs::write(&path, artifact.bytes()).await?;
        written.push(path);
    }
    Ok(written)
}

fn file_name(artifact: &Artifact) -> String {
    Url::parse(&artifact.url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("artifact-{}.bin", artifact.index))
}

fn format_size(bytes: usize) -> String {
    let size_mb = bytes as f64 / (1024.0 * 1024.0);
    if size_mb > 1024.0 {
        format!("{:.2} GB", size_mb / 1024.0)
    } else if size_mb >= 1.0 {
        format!("{:.2} MB", size_mb)
    } else {
        format!("{} B", bytes)
    }
}
