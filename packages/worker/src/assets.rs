//! Retrieval of support files the engine needs before it can run.
//!
//! Assets are addressed by relative path (`cm/analog.cm`, `spinit`,
//! `ngspice.wasm`). A source resolves that path against wherever the
//! assets are actually served from.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::FetchError;
use crate::fs::components;

/// Binary and text retrieval by relative path.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch_binary(&self, path: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch an asset as text. Invalid UTF-8 is replaced, not rejected.
    async fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        let bytes = self.fetch_binary(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Assets served over HTTP from a base URL.
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: Client,
    base: Url,
}

impl HttpAssetSource {
    /// Create a source rooted at `base`. A missing trailing slash is added
    /// so relative paths land inside the base rather than beside it.
    pub fn new(base: &str) -> Result<Self, FetchError> {
        Ok(Self::with_client(Client::new(), Url::parse(base)?))
    }

    pub fn with_client(client: Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, FetchError> {
        let url = self.base.join(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch_binary(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(path).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                path: path.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }

    async fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        let response = self.get(path).await?;
        response.text().await.map_err(|source| FetchError::Transport {
            path: path.to_string(),
            source,
        })
    }
}

/// Assets read from a local directory.
///
/// A missing file fails the same way a 404 does over HTTP.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FetchError> {
        let parts = components(path).map_err(|_| FetchError::not_found(path))?;
        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(resolved)
    }
}

#[async_trait]
impl AssetSource for DirAssetSource {
    async fn fetch_binary(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::not_found(path))
            }
            Err(source) => Err(FetchError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }
}
