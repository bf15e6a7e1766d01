//! Authenticated "is there an update" decision.
//!
//! The oracle fetches `latest_version.json`, verifies its signature with the
//! installation's public key and compares the version string with the local
//! one. Every failure fails closed: the caller sees "no update".

use skiff_crypto::{CryptoError, ManifestVerifier, VersionManifest, MANIFEST_FILE};
use tracing::{debug, info, warn};

use crate::source::{RemoteSource, SourceError, METADATA_LIMIT};

/// Result of one manifest check, with the reason when there is no update.
#[derive(Debug)]
pub enum CheckOutcome {
    /// The authenticated remote version equals the local one.
    UpToDate,
    /// A different, authenticated version is published.
    Available(String),
    /// The manifest could not be fetched.
    Unreachable(SourceError),
    /// The manifest signature did not verify.
    SignatureInvalid { version: String },
    /// The manifest body could not be decoded.
    MalformedManifest(String),
}

impl CheckOutcome {
    /// Collapse into `(update_available, version)`.
    ///
    /// `version` is the remote version when an update is available and
    /// `local_version` otherwise.
    pub fn into_pair(self, local_version: &str) -> (bool, String) {
        match self {
            CheckOutcome::Available(version) => (true, version),
            _ => (false, local_version.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CheckOutcome::Available(_))
    }

    /// Whether the failure was a network failure.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, CheckOutcome::Unreachable(_))
    }
}

/// Decides whether an authenticated update is available.
pub struct VersionOracle<'a> {
    verifier: &'a ManifestVerifier,
}

impl<'a> VersionOracle<'a> {
    pub fn new(verifier: &'a ManifestVerifier) -> Self {
        Self { verifier }
    }

    /// `(true, remote)` when an authenticated, different version exists;
    /// `(false, local_version)` otherwise.
    pub async fn check_for_update(
        &self,
        local_version: &str,
        source: &dyn RemoteSource,
    ) -> (bool, String) {
        self.check_detailed(local_version, source)
            .await
            .into_pair(local_version)
    }

    /// Same check, keeping the reason for a negative answer.
    pub async fn check_detailed(
        &self,
        local_version: &str,
        source: &dyn RemoteSource,
    ) -> CheckOutcome {
        let body = match source.fetch(MANIFEST_FILE, Some(METADATA_LIMIT)).await {
            Ok(body) => body,
            Err(e) => {
                warn!(source = %source.describe(), error = %e, "version manifest unreachable");
                return CheckOutcome::Unreachable(e);
            }
        };

        let manifest = match VersionManifest::from_json(&body) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "version manifest is not valid JSON");
                return CheckOutcome::MalformedManifest(e.to_string());
            }
        };

        match manifest.verify(self.verifier) {
            Ok(()) => {}
            Err(CryptoError::InvalidSignatureEncoding(reason)) => {
                warn!(version = %manifest.version, reason = %reason, "manifest signature is not decodable");
                return CheckOutcome::MalformedManifest(reason);
            }
            Err(e) => {
                warn!(version = %manifest.version, error = %e, "manifest signature invalid, ignoring");
                return CheckOutcome::SignatureInvalid {
                    version: manifest.version,
                };
            }
        }

        if manifest.version == local_version {
            debug!(version = %local_version, "already up to date");
            CheckOutcome::UpToDate
        } else {
            info!(local = %local_version, remote = %manifest.version, "update available");
            CheckOutcome::Available(manifest.version)
        }
    }
}
