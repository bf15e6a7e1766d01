//! Per-installation key material.
//!
//! Two keys live under `keys/`:
//! - `encryption_key.bin`: the 32-byte artifact key, generated on first run
//!   or provisioned by copying the publisher's key file into place.
//! - `public_key.pem`: the manifest verification key. Taken from the pinned
//!   configuration when present, otherwise fetched once from the
//!   distribution root and trusted from then on.
//!
//! A cached key is never re-fetched. Only a pinned key that differs from
//! the cache replaces it.

use std::path::PathBuf;

use skiff_crypto::{ArtifactKey, ManifestVerifier, PUBLIC_KEY_FILE};
use tracing::{info, warn};

use crate::error::UpdateError;
use crate::fsutil;
use crate::layout::InstallLayout;
use crate::source::{RemoteSource, METADATA_LIMIT};

/// Loads, creates and caches the installation's keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    symmetric_key_file: PathBuf,
    public_key_file: PathBuf,
    pinned_public_key: Option<String>,
}

impl KeyStore {
    pub fn new(layout: &InstallLayout, pinned_public_key: Option<String>) -> Self {
        Self {
            symmetric_key_file: layout.symmetric_key_file(),
            public_key_file: layout.public_key_file(),
            pinned_public_key,
        }
    }

    /// Return the persisted artifact key, generating and persisting one on
    /// first use.
    pub fn load_or_create_symmetric_key(&self) -> Result<ArtifactKey, UpdateError> {
        match std::fs::read(&self.symmetric_key_file) {
            Ok(bytes) => ArtifactKey::from_bytes(&bytes).map_err(|e| {
                UpdateError::KeyProvisioning(format!(
                    "{}: {e}",
                    self.symmetric_key_file.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = ArtifactKey::generate()
                    .map_err(|e| UpdateError::KeyProvisioning(e.to_string()))?;
                fsutil::write_atomic(&self.symmetric_key_file, key.as_bytes())?;
                restrict_permissions(&self.symmetric_key_file);
                info!(path = ?self.symmetric_key_file, "generated installation encryption key");
                Ok(key)
            }
            Err(e) => Err(UpdateError::KeyProvisioning(format!(
                "{}: {e}",
                self.symmetric_key_file.display()
            ))),
        }
    }

    /// Return the manifest verification key.
    ///
    /// A pinned key always wins: it is returned without any network access
    /// and replaces a cached key that differs from it. Without a pin the
    /// cached file is used, and only when there is none is `public_key.pem`
    /// fetched once from `source`. An unpinned cached key that does not parse
    /// is an error; it is never replaced by a fresh download.
    pub async fn load_or_bootstrap_public_key(
        &self,
        source: &dyn RemoteSource,
    ) -> Result<ManifestVerifier, UpdateError> {
        if let Some(pinned) = &self.pinned_public_key {
            return self.apply_pinned_key(pinned);
        }

        if let Some(pem) = self.read_cached_key()? {
            return parse_public_key(&pem, "cached public key");
        }

        warn!(
            source = %source.describe(),
            "no cached or pinned public key, trusting the distribution host on first use"
        );
        let bytes = source
            .fetch(PUBLIC_KEY_FILE, Some(METADATA_LIMIT))
            .await
            .map_err(UpdateError::KeyUnreachable)?;
        let pem = String::from_utf8(bytes)
            .map_err(|_| UpdateError::KeyProvisioning("public key is not UTF-8".to_string()))?;

        let verifier = parse_public_key(&pem, "downloaded public key")?;
        fsutil::write_atomic(&self.public_key_file, pem.as_bytes())?;
        info!(path = ?self.public_key_file, "cached downloaded manifest public key");
        Ok(verifier)
    }

    fn apply_pinned_key(&self, pinned: &str) -> Result<ManifestVerifier, UpdateError> {
        let verifier = parse_public_key(pinned, "pinned public key")?;

        let cached = self
            .read_cached_key()?
            .and_then(|pem| ManifestVerifier::from_public_key_pem(&pem).ok());
        match cached {
            Some(cached) if cached == verifier => {}
            Some(_) => {
                warn!(path = ?self.public_key_file, "cached public key differs from the pinned key, replacing it");
                fsutil::write_atomic(&self.public_key_file, pinned.as_bytes())?;
            }
            None => {
                fsutil::write_atomic(&self.public_key_file, pinned.as_bytes())?;
                info!(path = ?self.public_key_file, "cached pinned manifest public key");
            }
        }
        Ok(verifier)
    }

    fn read_cached_key(&self) -> Result<Option<String>, UpdateError> {
        match std::fs::read_to_string(&self.public_key_file) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UpdateError::KeyProvisioning(format!(
                "{}: {e}",
                self.public_key_file.display()
            ))),
        }
    }
}

fn parse_public_key(pem: &str, origin: &str) -> Result<ManifestVerifier, UpdateError> {
    ManifestVerifier::from_public_key_pem(pem)
        .map_err(|e| UpdateError::KeyProvisioning(format!("{origin}: {e}")))
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(path = ?path, error = %e, "failed to restrict key file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) {}
