//! Bundle fetcher
//!
//! Downloads the raw STIX bundle for a matrix and keeps a local copy next to
//! the graph cache. Download-or-fail completes before any transformation
//! starts; the transformer never sees a partial bundle.

use crate::catalog::MatrixSource;
use crate::stix::{AttackBundle, BundleError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads matrix bundles over HTTPS.
pub struct BundleFetcher {
    client: reqwest::Client,
}

impl BundleFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("default reqwest client"),
        }
    }

    /// Fetch the raw bundle for `source` and decode it.
    pub async fn fetch(&self, source: &MatrixSource) -> Result<AttackBundle, FetchError> {
        let bytes = self.download(source).await?;
        Ok(AttackBundle::from_slice(&bytes)?)
    }

    /// Return the decoded bundle for `source`, downloading into `dir` unless
    /// a local copy already exists (or `force` is set).
    pub async fn fetch_cached(
        &self,
        source: &MatrixSource,
        dir: &Path,
        force: bool,
    ) -> Result<AttackBundle, FetchError> {
        let path = self.bundle_path(source, dir);
        if force || !path.exists() {
            let bytes = self.download(source).await?;
            std::fs::create_dir_all(dir)?;
            std::fs::write(&path, &bytes)?;
            info!(matrix = source.name, path = %path.display(), "bundle downloaded");
        }
        Ok(AttackBundle::from_file(&path)?)
    }

    /// Local path of the downloaded bundle file.
    pub fn bundle_path(&self, source: &MatrixSource, dir: &Path) -> PathBuf {
        dir.join(source.file)
    }

    async fn download(&self, source: &MatrixSource) -> Result<Vec<u8>, FetchError> {
        info!(matrix = source.name, url = source.url, "downloading bundle");
        let resp = self
            .client
            .get(source.url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(FetchError::Http(resp.status().as_u16()));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Default for BundleFetcher {
    fn default() -> Self {
        Self::new()
    }
}
