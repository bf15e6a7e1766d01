//! The signed version manifest and the distribution layout.
//!
//! A distribution root served by a static file host looks like:
//!
//! ```text
//! <root>/
//! ├── latest_version.json        {"version": "...", "signature": "<base64>"}
//! ├── public_key.pem             bootstrap only
//! └── <version>/
//!     └── update.tar.gz.enc      sealed release archive
//! ```
//!
//! Versions are opaque strings. They are only ever compared for equality.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::signing::{ManifestSigner, ManifestVerifier};

/// Manifest file name at the distribution root.
pub const MANIFEST_FILE: &str = "latest_version.json";

/// Public key file name at the distribution root.
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// Sealed archive file name inside a version directory.
pub const ARTIFACT_FILE: &str = "update.tar.gz.enc";

/// Longest version string accepted.
const MAX_VERSION_LEN: usize = 128;

/// The `latest_version.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Opaque version string.
    pub version: String,
    /// Signature over the UTF-8 bytes of `version`, base64 (standard, padded).
    pub signature: String,
}

impl VersionManifest {
    /// Sign `version` and build the manifest record.
    pub fn signed(version: &str, signer: &ManifestSigner) -> Result<Self, CryptoError> {
        validate_version(version)?;
        let signature = signer.sign_version(version);
        Ok(Self {
            version: version.to_string(),
            signature: STANDARD.encode(signature),
        })
    }

    /// Parse the JSON body fetched from the host.
    pub fn from_json(data: &[u8]) -> Result<Self, CryptoError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize for publishing.
    pub fn to_json(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode the signature from its transport encoding.
    pub fn signature_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        STANDARD
            .decode(self.signature.trim())
            .map_err(|e| CryptoError::InvalidSignatureEncoding(e.to_string()))
    }

    /// Verify the signature over the version string.
    pub fn verify(&self, verifier: &ManifestVerifier) -> Result<(), CryptoError> {
        let signature = self.signature_bytes()?;
        verifier.verify_version(&self.version, &signature)
    }
}

/// Check that a version string is safe to use as a path segment, both in
/// URLs and on the local filesystem.
///
/// Accepted: 1 to 128 characters from `[A-Za-z0-9._+-]`, not `.` or `..`.
pub fn validate_version(version: &str) -> Result<(), CryptoError> {
    let valid_chars = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'));

    if version.is_empty()
        || version.len() > MAX_VERSION_LEN
        || !valid_chars
        || version == "."
        || version == ".."
    {
        return Err(CryptoError::InvalidVersion(version.to_string()));
    }
    Ok(())
}

/// Relative path of the sealed archive for `version`.
pub fn artifact_path(version: &str) -> Result<String, CryptoError> {
    validate_version(version)?;
    Ok(format!("{version}/{ARTIFACT_FILE}"))
}
