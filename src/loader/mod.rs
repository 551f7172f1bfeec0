//! Artifact loading
//!
//! The [`Loader`] resolves locators, fetches buffers (through the shared
//! [`ArtifactCache`](crate::cache::ArtifactCache) when one is attached) and
//! keeps them in an ordered, append-only sequence:
//! - Engine and weight buffers are appended one call at a time
//! - Manifests are expanded into their listed entries, appended in listed order
//! - A failed call appends nothing; earlier successes are kept

mod artifact;
mod fetch;
mod manifest;
mod source;

pub use artifact::{Artifact, ArtifactRole};
pub use fetch::{DefaultFetcher, FetchError, Fetcher, MemoryFetcher};
pub use manifest::{Manifest, ManifestEntry};
pub use source::SourceResolver;

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::cache::ArtifactCache;
use crate::error::{Error, Result};

/// Ordered artifact sequence plus the means to fill it
pub struct Loader {
    fetcher: Arc<dyn Fetcher>,
    resolver: SourceResolver,
    cache: Option<ArtifactCache>,
    artifacts: Vec<Artifact>,
}

impl Loader {
    /// Create a loader. Pass `None` as `cache` to fetch every buffer directly.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        resolver: SourceResolver,
        cache: Option<ArtifactCache>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            cache,
            artifacts: Vec::new(),
        }
    }

    pub fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    /// Fetch the engine module at `locator` and append it
    ///
    /// Returns the sequence index of the new artifact.
    pub async fn load_engine(&mut self, locator: &str) -> Result<usize> {
        self.load(locator, ArtifactRole::Engine).await
    }

    /// Fetch the weights at `locator` and append them
    pub async fn load_model(&mut self, locator: &str) -> Result<usize> {
        self.load(locator, ArtifactRole::Weight).await
    }

    async fn load(&mut self, locator: &str, role: ArtifactRole) -> Result<usize> {
        let url = self.resolver.resolve(locator)?;
        let data = self.fetch_artifact(url.clone(), role).await?;

        tracing::info!("Loaded {} from {} ({} bytes)", role, url, data.len());

        let index = self.artifacts.len();
        self.artifacts.push(Artifact {
            role,
            index,
            url: url.into(),
            data,
        });
        Ok(index)
    }

    /// Fetch the manifest at `locator`, then every file it lists
    ///
    /// Entries are fetched concurrently and appended in listed order once all
    /// of them have arrived. If any entry fails, nothing from this manifest is
    /// appended and the error names that entry's URL and role.
    ///
    /// Returns the number of artifacts appended.
    pub async fn load_from_manifest(&mut self, locator: &str) -> Result<usize> {
        let manifest_url = self.resolver.resolve(locator)?;

        let raw = self.fetcher.fetch(&manifest_url).await.map_err(|e| {
            Error::load(manifest_url.as_str(), ArtifactRole::Manifest, e.to_string())
        })?;
        let manifest = Manifest::from_json(&raw).map_err(|e| {
            Error::load(
                manifest_url.as_str(),
                ArtifactRole::Manifest,
                format!("invalid manifest: {}", e),
            )
        })?;

        tracing::info!(
            "Parsed manifest {} ({} entries)",
            manifest_url,
            manifest.len()
        );

        let entries = manifest
            .files
            .iter()
            .map(|entry| {
                let url = self.resolver.resolve_entry(&manifest_url, &entry.url)?;
                Ok((url, entry.role))
            })
            .collect::<Result<Vec<_>>>()?;

        let fetches = entries
            .iter()
            .map(|(url, role)| self.fetch_artifact(url.clone(), *role));
        let buffers = futures::future::try_join_all(fetches).await?;

        let appended = entries.len();
        for ((url, role), data) in entries.into_iter().zip(buffers) {
            tracing::debug!("Manifest entry {} {} ({} bytes)", role, url, data.len());
            let index = self.artifacts.len();
            self.artifacts.push(Artifact {
                role,
                index,
                url: url.into(),
                data,
            });
        }

        tracing::info!("Loaded {} artifacts from {}", appended, manifest_url);
        Ok(appended)
    }

    /// Artifacts loaded so far, in load order
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Hand the current sequence to the caller, leaving the loader empty
    pub fn take_artifacts(&mut self) -> Vec<Artifact> {
        std::mem::take(&mut self.artifacts)
    }

    pub fn clear_artifacts(&mut self) {
        self.artifacts.clear();
    }

    /// Fetch one buffer, through the cache when attached
    async fn fetch_artifact(&self, url: Url, role: ArtifactRole) -> Result<Bytes> {
        let key = url.to_string();
        let fetcher = Arc::clone(&self.fetcher);
        let fetch = move || async move {
            fetcher
                .fetch(&url)
                .await
                .map_err(|e| Error::load(url.as_str(), role, e.to_string()))
        };

        match &self.cache {
            Some(cache) => cache.get_or_fetch(&key, fetch).await,
            None => fetch().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::CacheConfig;

    const BASE: &str = "http://host/";

    fn resolver() -> SourceResolver {
        SourceResolver::new(Some(Url::parse(BASE).unwrap()), "/srv/assets")
    }

    fn loader(fetcher: Arc<MemoryFetcher>, cache: Option<ArtifactCache>) -> Loader {
        Loader::new(fetcher, resolver(), cache)
    }

    #[tokio::test]
    async fn test_engine_then_model_order() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_file("http://host/models/engine.wasm", &b"engine"[..])
                .with_file("http://host/models/tiny.bin", &b"weights"[..]),
        );
        let mut loader = loader(fetcher.clone(), None);

        assert_eq!(loader.load_engine("/models/engine.wasm").await.unwrap(), 0);
        assert_eq!(loader.load_model("/models/tiny.bin").await.unwrap(), 1);

        let artifacts = loader.artifacts();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].role, ArtifactRole::Engine);
        assert_eq!(artifacts[0].bytes(), b"engine");
        assert_eq!(artifacts[1].role, ArtifactRole::Weight);
        assert_eq!(artifacts[1].url, "http://host/models/tiny.bin");
        assert_eq!(
            fetcher.requests(),
            vec![
                "http://host/models/engine.wasm".to_string(),
                "http://host/models/tiny.bin".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_load_appends_nothing_and_can_be_retried() {
        let fetcher = Arc::new(
            MemoryFetcher::new().with_file("http://host/models/engine.wasm", &b"engine"[..]),
        );
        let mut loader = loader(fetcher.clone(), None);

        loader.load_engine("/models/engine.wasm").await.unwrap();
        let err = loader.load_model("/models/tiny.bin").await.unwrap_err();
        match err {
            Error::Load { url, role, message } => {
                assert_eq!(url, "http://host/models/tiny.bin");
                assert_eq!(role, ArtifactRole::Weight);
                assert!(message.contains("404"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(loader.artifacts().len(), 1);

        fetcher.insert("http://host/models/tiny.bin", &b"weights"[..]);
        assert_eq!(loader.load_model("/models/tiny.bin").await.unwrap(), 1);
        assert_eq!(loader.artifacts()[0].role, ArtifactRole::Engine);
    }

    #[tokio::test]
    async fn test_manifest_order_is_listed_order() {
        let manifest = br#"{
            "files": [
                { "url": "/models/engine.wasm", "type": "engine" },
                { "url": "shard-0.bin", "type": "weight" },
                { "url": "shard-1.bin", "type": "weight" }
            ]
        }"#;
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_file("http://host/models/tiny/manifest.json", &manifest[..])
                .with_file("http://host/models/engine.wasm", &b"engine"[..])
                .with_file("http://host/models/tiny/shard-0.bin", &b"zero"[..])
                .with_file("http://host/models/tiny/shard-1.bin", &b"one"[..])
                // Earlier entries complete last
                .with_delay("http://host/models/engine.wasm", Duration::from_millis(40))
                .with_delay(
                    "http://host/models/tiny/shard-0.bin",
                    Duration::from_millis(20),
                ),
        );
        let mut loader = loader(fetcher, None);

        let appended = loader
            .load_from_manifest("/models/tiny/manifest.json")
            .await
            .unwrap();
        assert_eq!(appended, 3);

        let data: Vec<&[u8]> = loader.artifacts().iter().map(|a| a.bytes()).collect();
        assert_eq!(data, vec![&b"engine"[..], &b"zero"[..], &b"one"[..]]);
        let indices: Vec<usize> = loader.artifacts().iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_manifest_entry_failure_is_all_or_nothing() {
        let manifest = br#"{
            "files": [
                { "url": "/models/engine.wasm", "type": "engine" },
                { "url": "missing.bin", "type": "weight" }
            ]
        }"#;
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_file("http://host/models/manifest.json", &manifest[..])
                .with_file("http://host/models/engine.wasm", &b"engine"[..])
                .with_file("http://host/models/earlier.bin", &b"kept"[..]),
        );
        let mut loader = loader(fetcher, None);
        loader.load_model("/models/earlier.bin").await.unwrap();

        let err = loader
            .load_from_manifest("/models/manifest.json")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::load(
                "http://host/models/missing.bin",
                ArtifactRole::Weight,
                "HTTP 404"
            )
        );
        assert_eq!(loader.artifacts().len(), 1);
        assert_eq!(loader.artifacts()[0].bytes(), b"kept");
    }

    #[tokio::test]
    async fn test_missing_or_malformed_manifest() {
        let fetcher = Arc::new(
            MemoryFetcher::new().with_file("http://host/bad.json", &b"{ not json"[..]),
        );
        let mut loader = loader(fetcher, None);

        let err = loader.load_from_manifest("/absent.json").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Load {
                role: ArtifactRole::Manifest,
                ..
            }
        ));

        let err = loader.load_from_manifest("/bad.json").await.unwrap_err();
        assert!(err.to_string().contains("invalid manifest"));
        assert!(loader.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_clear_artifacts() {
        let fetcher =
            Arc::new(MemoryFetcher::new().with_file("http://host/a.bin", &b"a"[..]));
        let mut loader = loader(fetcher, None);

        loader.load_model("/a.bin").await.unwrap();
        loader.clear_artifacts();
        assert!(loader.artifacts().is_empty());

        assert_eq!(loader.load_model("/a.bin").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_loaders_sharing_a_cache_fetch_once() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with_file("http://host/models/tiny.bin", &b"weights"[..])
                .with_delay("http://host/models/tiny.bin", Duration::from_millis(20)),
        );
        let cache = ArtifactCache::new(CacheConfig::default());
        let mut first = loader(fetcher.clone(), Some(cache.clone()));
        let mut second = loader(fetcher.clone(), Some(cache.clone()));

        let (a, b) = tokio::join!(
            first.load_model("/models/tiny.bin"),
            second.load_model("/models/tiny.bin")
        );
        a.unwrap();
        b.unwrap();

        let mut third = loader(fetcher.clone(), Some(cache));
        third.load_model("/models/tiny.bin").await.unwrap();

        assert_eq!(fetcher.request_count("http://host/models/tiny.bin"), 1);
        assert_eq!(third.artifacts()[0].bytes(), b"weights");
    }
}
