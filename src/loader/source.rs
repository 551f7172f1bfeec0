//! Locator resolution
//!
//! A locator can be:
//! - An absolute `http`, `https` or `file` URL
//! - A root-relative path such as `/models/engine.wasm`, resolved against the
//!   configured base URL, or against the local asset root when no base is set
//!
//! The resolved URL string is the canonical source identity used as cache key.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{Error, Result};

/// Schemes the fetch layer knows how to retrieve
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// Resolves artifact locators into canonical URLs
#[derive(Debug, Clone)]
pub struct SourceResolver {
    /// Origin for relative locators (e.g. `http://127.0.0.1:3000/`)
    base_url: Option<Url>,
    /// Directory for relative locators when no base URL is set
    asset_root: PathBuf,
}

impl SourceResolver {
    pub fn new(base_url: Option<Url>, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url,
            asset_root: asset_root.into(),
        }
    }

    /// Build a resolver from an unparsed base URL
    pub fn from_config(base_url: Option<&str>, asset_root: &Path) -> Result<Self> {
        let base_url = base_url
            .map(|raw| {
                let url = Url::parse(raw)
                    .map_err(|e| Error::config(format!("Invalid base URL '{}': {}", raw, e)))?;
                check_scheme(&url)?;
                Ok(url)
            })
            .transpose()?;
        Ok(Self::new(base_url, asset_root))
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Resolve a locator into its canonical URL
    pub fn resolve(&self, locator: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(locator) {
            check_scheme(&url)?;
            return Ok(url);
        }

        if let Some(base) = &self.base_url {
            return base
                .join(locator)
                .map_err(|e| Error::config(format!("Cannot resolve '{}': {}", locator, e)));
        }

        let path = self.asset_root.join(locator.trim_start_matches('/'));
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .map_err(|e| Error::config(format!("Cannot determine working directory: {}", e)))?
                .join(path)
        };

        Url::from_file_path(&path)
            .map_err(|_| Error::config(format!("Cannot express {} as a URL", path.display())))
    }

    /// Resolve a locator listed inside a manifest
    ///
    /// Root-relative and absolute locators resolve like any other locator;
    /// bare relative ones (`shard-0.bin`) are relative to the manifest itself.
    pub fn resolve_entry(&self, manifest_url: &Url, locator: &str) -> Result<Url> {
        if locator.starts_with('/') || Url::parse(locator).is_ok() {
            return self.resolve(locator);
        }
        manifest_url
            .join(locator)
            .map_err(|e| Error::config(format!("Cannot resolve '{}': {}", locator, e)))
    }

    /// Express a resolved URL as the path string a path-based backend expects
    ///
    /// `file` URLs become filesystem paths; anything else stays a URL.
    pub fn model_path(url: &Url) -> String {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                return path.display().to_string();
            }
        }
        url.to_string()
    }
}

fn check_scheme(url: &Url) -> Result<()> {
    if SUPPORTED_SCHEMES.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "Unsupported URL scheme '{}' in {}",
            url.scheme(),
            url
        )))
    }
}
