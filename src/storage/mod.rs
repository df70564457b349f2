//! File storage
//!
//! Input files are addressed by URL. `LocalFileStorage` serves three kinds:
//! URLs under its own public base URL (read from the local root), `file://`
//! URLs, and remote `http(s)://` URLs fetched with reqwest. Processed files
//! are written under the root and published under the base URL.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::constants::DEFAULT_FETCH_TIMEOUT_MS;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch file: {0}")]
    Fetch(String),

    #[error("Unsupported or invalid file URL: {0}")]
    InvalidUrl(String),

    #[error("File not found: {0}")]
    NotFound(String),
}

/// SHA-256 of `bytes`, lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Last path segment of a URL, without query or fragment, percent-decoded
pub fn file_name_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Lowercased extension of a file name, if any
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// A file held in memory together with its name
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl FetchedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file; the name is the path's file name
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
            _ => StorageError::Io(e),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.bytes)
    }

    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

/// Where input files come from and processed files go
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Load the file behind `url`
    async fn fetch(&self, url: &str) -> Result<FetchedFile, StorageError>;

    /// Store `bytes` as `name` and return the URL it is published under
    async fn store(&self, name: &str, bytes: Bytes) -> Result<String, StorageError>;
}

/// Local-disk storage with an HTTP fallback for remote URLs
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
    public_base_url: String,
    http_client: reqwest::Client,
}

impl LocalFileStorage {
    /// Create a storage rooted at `root`, publishing under `public_base_url`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Fetch` if the HTTP client cannot be created.
    pub fn new<P: Into<PathBuf>>(
        root: P,
        public_base_url: &str,
        fetch_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| StorageError::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn with_default_timeout<P: Into<PathBuf>>(
        root: P,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        Self::new(
            root,
            public_base_url,
            Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    /// Map a published URL back to its path under the root
    fn local_path(&self, url: &str) -> Result<Option<PathBuf>, StorageError> {
        let prefix = format!("{}/", self.public_base_url);
        let Some(relative) = url.strip_prefix(&prefix) else {
            return Ok(None);
        };

        let decoded = urlencoding::decode(relative)
            .map_err(|_| StorageError::InvalidUrl(url.to_string()))?;
        let relative = Path::new(&*decoded);

        // Only plain segments: no "..", no absolute paths
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidUrl(url.to_string()));
        }

        Ok(Some(self.root.join(relative)))
    }

    async fn fetch_http(&self, url: &str) -> Result<FetchedFile, StorageError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::Fetch(format!("Request timed out: {}", url))
            } else {
                StorageError::Fetch(format!("HTTP fetch failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(StorageError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Fetch(format!(
                "HTTP request failed with status: {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Fetch(format!("Failed to read HTTP body: {}", e)))?;

        Ok(FetchedFile::new(file_name_from_url(url), bytes))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn fetch(&self, url: &str) -> Result<FetchedFile, StorageError> {
        if let Some(path) = self.local_path(url)? {
            return FetchedFile::from_path(path).await;
        }
        if let Some(path) = url.strip_prefix("file://") {
            return FetchedFile::from_path(path).await;
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url).await;
        }
        Err(StorageError::InvalidUrl(url.to_string()))
    }

    async fn store(&self, name: &str, bytes: Bytes) -> Result<String, StorageError> {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StorageError::InvalidUrl(format!("invalid file name: {}", name)))?;

        // One directory per stored file keeps the original name intact
        let slot = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&slot);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&file_name), &bytes).await?;

        let url = format!(
            "{}/{}/{}",
            self.public_base_url,
            slot,
            urlencoding::encode(&file_name)
        );

        tracing::debug!(url = %url, size = bytes.len(), "Stored processed file");
        Ok(url)
    }
}
