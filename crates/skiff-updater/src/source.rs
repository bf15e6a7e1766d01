//! Distribution sources.
//!
//! A distribution root is a tree of static files (see
//! [`skiff_crypto::MANIFEST_FILE`]). [`RemoteSource`] is the seam every
//! pipeline stage fetches through: [`HttpSource`] reads from a static host,
//! [`DirectorySource`] from a local directory or removable media. One call
//! is one request; retries are the scheduler's business.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::SourceConfig;
use crate::error::UpdateError;

/// Upper bound for small metadata files (manifest, public key).
pub const METADATA_LIMIT: u64 = 64 * 1024;

/// Failures of a single fetch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{path}: HTTP status {status}")]
    Status { path: String, status: u16 },

    #[error("{path}: not found")]
    NotFound { path: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{path}: body exceeds {limit} bytes")]
    TooLarge { path: String, limit: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Read access to a distribution root.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the file at `path` (relative to the root, `/`-separated).
    ///
    /// Bodies larger than `limit` bytes are rejected with
    /// [`SourceError::TooLarge`].
    async fn fetch(&self, path: &str, limit: Option<u64>) -> Result<Vec<u8>, SourceError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Build the source named by the configuration.
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn RemoteSource>, UpdateError> {
    match (&config.base_url, &config.directory) {
        (Some(url), None) => {
            let source = HttpSource::new(url, config).map_err(|e| UpdateError::Config(e.to_string()))?;
            Ok(Arc::new(source))
        }
        (None, Some(dir)) => Ok(Arc::new(DirectorySource::new(dir))),
        (None, None) => Err(UpdateError::Config(
            "no distribution source configured (set source.base_url or source.directory)"
                .to_string(),
        )),
        (Some(_), Some(_)) => Err(UpdateError::Config(
            "source.base_url and source.directory are mutually exclusive".to_string(),
        )),
    }
}

/// Static HTTP(S) host.
pub struct HttpSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSource {
    /// Create a source rooted at `base_url`.
    ///
    /// A missing trailing slash is added so relative paths resolve below the
    /// root instead of replacing its last segment.
    pub fn new(base_url: &str, config: &SourceConfig) -> Result<Self, SourceError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| SourceError::InvalidPath(e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, base })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, path: &str, limit: Option<u64>) -> Result<Vec<u8>, SourceError> {
        check_relative(path)?;
        let url = self
            .base
            .join(path)
            .map_err(|e| SourceError::InvalidPath(e.to_string()))?;
        debug!(url = %url, "fetching");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        if let (Some(limit), Some(len)) = (limit, response.content_length()) {
            if len > limit {
                return Err(SourceError::TooLarge {
                    path: path.to_string(),
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(limit) = limit {
                if (body.len() + chunk.len()) as u64 > limit {
                    return Err(SourceError::TooLarge {
                        path: path.to_string(),
                        limit,
                    });
                }
            }
            body.extend_from_slice(&chunk);
        }

        debug!(path = %path, bytes = body.len(), "fetched");
        Ok(body)
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}

/// Distribution root on the local filesystem.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteSource for DirectorySource {
    async fn fetch(&self, path: &str, limit: Option<u64>) -> Result<Vec<u8>, SourceError> {
        check_relative(path)?;
        let full = self.root.join(path);

        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(SourceError::NotFound {
                path: path.to_string(),
            });
        }
        if let Some(limit) = limit {
            if meta.len() > limit {
                return Err(SourceError::TooLarge {
                    path: path.to_string(),
                    limit,
                });
            }
        }

        let body = tokio::fs::read(&full).await?;
        debug!(path = ?full, bytes = body.len(), "read from directory source");
        Ok(body)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Reject anything but plain relative segments.
fn check_relative(path: &str) -> Result<(), SourceError> {
    let valid = !path.is_empty()
        && !path.contains('\\')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidPath(path.to_string()))
    }
}
