//! Error type for the wire primitives.

use thiserror::Error;

/// Errors raised while sealing, opening, signing or verifying.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key bytes have the wrong length for the cipher.
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// A PEM document could not be parsed as the expected key type.
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Sealed artifact is shorter than its header or carries the wrong magic.
    #[error("malformed sealed artifact: {0}")]
    MalformedArtifact(&'static str),

    /// AEAD tag did not verify: wrong key or corrupted bytes.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    /// Signature did not verify against the public key.
    #[error("signature verification failed")]
    BadSignature,

    /// Signature could not be decoded from its transport encoding.
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),

    /// Version string is not usable as a distribution path segment.
    #[error("invalid version string {0:?}")]
    InvalidVersion(String),

    #[error("RNG failed")]
    RngError,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
