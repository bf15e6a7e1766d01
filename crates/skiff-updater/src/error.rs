//! Error types for the update pipeline.

use thiserror::Error;

use crate::merge::MergeError;
use crate::source::SourceError;

/// Errors that can occur during an update cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Host unreachable, non-success status, or timeout.
    #[error("network error: {0}")]
    Network(#[source] SourceError),

    /// Public key could not be fetched or parsed, or the symmetric key on
    /// disk is unusable.
    #[error("key provisioning failed: {0}")]
    KeyProvisioning(String),

    /// The public key could not be fetched for trust-on-first-use.
    #[error("key provisioning failed: public key unreachable: {0}")]
    KeyUnreachable(#[source] SourceError),

    /// Manifest signature did not verify against the cached public key.
    #[error("manifest signature invalid for version {version:?}")]
    SignatureInvalid { version: String },

    /// Manifest body could not be decoded.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// Artifact download failed. Nothing was written to disk.
    #[error("artifact fetch failed: {0}")]
    Fetch(#[source] SourceError),

    /// Artifact did not open under the installation key.
    #[error("artifact decryption failed: {0}")]
    Decryption(String),

    /// Archive was malformed or contained an unsafe entry.
    #[error("archive extraction failed: {0}")]
    Extraction(String),

    /// Template or live configuration could not be merged.
    #[error("configuration merge failed: {0}")]
    ConfigMerge(#[from] MergeError),

    /// Staged release could not be promoted.
    #[error("promotion failed: {0}")]
    Promotion(String),

    /// Version string unusable as a path segment.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Updater configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether the failure came from the network and may clear up on its own.
    ///
    /// The scheduler backs off after transient failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpdateError::Network(_) | UpdateError::Fetch(_) | UpdateError::KeyUnreachable(_)
        )
    }
}

impl From<skiff_crypto::CryptoError> for UpdateError {
    fn from(err: skiff_crypto::CryptoError) -> Self {
        match err {
            skiff_crypto::CryptoError::InvalidVersion(v) => UpdateError::InvalidVersion(v),
            skiff_crypto::CryptoError::DecryptionFailed
            | skiff_crypto::CryptoError::MalformedArtifact(_) => {
                UpdateError::Decryption(err.to_string())
            }
            other => UpdateError::KeyProvisioning(other.to_string()),
        }
    }
}
