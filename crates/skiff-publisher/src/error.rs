//! Publisher errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0} already exists (use --force to overwrite)")]
    KeyExists(PathBuf),

    #[error("missing key file {0}")]
    MissingKey(PathBuf),

    #[error("invalid release directory: {0}")]
    InvalidRelease(String),

    #[error("distribution check failed: {0}")]
    Verification(String),

    #[error(transparent)]
    Crypto(#[from] skiff_crypto::CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<walkdir::Error> for PublishError {
    fn from(e: walkdir::Error) -> Self {
        PublishError::InvalidRelease(e.to_string())
    }
}
