//! Artifact retrieval
//!
//! [`Fetcher`] is the seam between the loader and the outside world.
//! [`DefaultFetcher`] speaks HTTP(S) and reads `file` URLs; [`MemoryFetcher`]
//! serves buffers held in process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use url::Url;

/// Why a single fetch failed
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status}")]
    Status { status: u16 },

    /// Connection, TLS or body transfer failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Local file could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// No handler for this URL scheme
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Retrieves the raw bytes behind a canonical URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError>;
}

/// HTTP(S) and local file fetcher
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| crate::Error::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &Url) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    async fn fetch_file(&self, url: &Url) -> Result<Bytes, FetchError> {
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::Io(format!("not a local path: {}", url)))?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        match url.scheme() {
            "http" | "https" => self.fetch_http(url).await,
            "file" => self.fetch_file(url).await,
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// In-process fetcher over a fixed set of buffers
///
/// Unknown URLs answer with HTTP 404. Every request is recorded, which makes
/// fetch ordering and deduplication observable.
#[derive(Default)]
pub struct MemoryFetcher {
    files: Mutex<HashMap<String, Bytes>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` at `url`
    pub fn with_file(self, url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(url, data);
        self
    }

    /// Delay responses for `url` by `delay`
    pub fn with_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().insert(url.into(), delay);
        self
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.files.lock().insert(url.into(), data.into());
    }

    pub fn remove(&self, url: &str) -> Option<Bytes> {
        self.files.lock().remove(url)
    }

    /// URLs requested so far, in request order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Number of requests made for `url`
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, FetchError> {
        let key = url.as_str();
        self.requests.lock().push(key.to_string());

        let delay = self.delays.lock().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.files
            .lock()
            .get(key)
            .cloned()
            .ok_or(FetchError::Status { status: 404 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let fetcher = DefaultFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let data = fetcher.fetch(&url).await.unwrap();
        assert_eq!(&data[..], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.bin")).unwrap();

        let fetcher = DefaultFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Io(_)));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let fetcher = DefaultFetcher::new(Duration::from_secs(5)).unwrap();
        let url = Url::parse("ftp://host/model.bin").unwrap();
        assert_eq!(
            fetcher.fetch(&url).await.unwrap_err(),
            FetchError::UnsupportedScheme("ftp".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_fetcher_records_requests() {
        let fetcher = MemoryFetcher::new().with_file("http://host/a.bin", vec![7u8]);
        let a = Url::parse("http://host/a.bin").unwrap();
        let b = Url::parse("http://host/b.bin").unwrap();

        assert_eq!(&fetcher.fetch(&a).await.unwrap()[..], &[7]);
        assert_eq!(
            fetcher.fetch(&b).await.unwrap_err(),
            FetchError::Status { status: 404 }
        );
        assert_eq!(
            fetcher.requests(),
            vec!["http://host/a.bin".to_string(), "http://host/b.bin".to_string()]
        );
        assert_eq!(fetcher.request_count("http://host/a.bin"), 1);
    }
}
