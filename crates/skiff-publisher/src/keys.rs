//! Publisher key material.
//!
//! A key directory holds three files:
//! - `private_key.pem`: manifest signing key (PKCS#8). Never leaves the
//!   publisher.
//! - `public_key.pem`: verification key, published at the distribution root
//!   and optionally pinned in client configuration.
//! - `encryption_key.bin`: 32-byte artifact key, shared with clients out of
//!   band.

use std::io::Write;
use std::path::Path;

use skiff_crypto::{ArtifactKey, ManifestSigner, ManifestVerifier, PUBLIC_KEY_FILE};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::PublishError;

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const ENCRYPTION_KEY_FILE: &str = "encryption_key.bin";

/// Signing key and artifact key.
pub struct KeyMaterial {
    pub signer: ManifestSigner,
    pub artifact_key: ArtifactKey,
}

impl KeyMaterial {
    /// Fresh keys from the OS RNG.
    pub fn generate() -> Result<Self, PublishError> {
        Ok(Self {
            signer: ManifestSigner::generate(),
            artifact_key: ArtifactKey::generate()?,
        })
    }

    /// Load keys from a key directory.
    pub fn load(dir: &Path) -> Result<Self, PublishError> {
        let private_path = dir.join(PRIVATE_KEY_FILE);
        let key_path = dir.join(ENCRYPTION_KEY_FILE);

        let pem = read_required(&private_path)?;
        let pem = String::from_utf8(pem).map_err(|_| {
            skiff_crypto::CryptoError::InvalidKeyEncoding("private key is not UTF-8".to_string())
        })?;
        let signer = ManifestSigner::from_pkcs8_pem(&pem)?;
        let artifact_key = ArtifactKey::from_bytes(&read_required(&key_path)?)?;

        Ok(Self {
            signer,
            artifact_key,
        })
    }

    pub fn verifier(&self) -> ManifestVerifier {
        self.signer.verifier()
    }

    /// Write all three key files into `dir`.
    ///
    /// Refuses to replace existing files unless `force` is set.
    pub fn save(&self, dir: &Path, force: bool) -> Result<(), PublishError> {
        std::fs::create_dir_all(dir)?;
        let files = [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, ENCRYPTION_KEY_FILE];
        if !force {
            if let Some(existing) = files.iter().map(|f| dir.join(f)).find(|p| p.exists()) {
                return Err(PublishError::KeyExists(existing));
            }
        }

        write_file(&dir.join(PRIVATE_KEY_FILE), self.signer.to_pkcs8_pem()?.as_bytes(), true)?;
        write_file(&dir.join(ENCRYPTION_KEY_FILE), self.artifact_key.as_bytes(), true)?;
        write_file(
            &dir.join(PUBLIC_KEY_FILE),
            self.verifier().to_public_key_pem()?.as_bytes(),
            false,
        )?;
        info!(dir = ?dir, "key material written");
        Ok(())
    }
}

fn read_required(path: &Path) -> Result<Vec<u8>, PublishError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PublishError::MissingKey(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write through a temp file in the same directory, then rename.
pub(crate) fn write_file(path: &Path, data: &[u8], secret: bool) -> Result<(), PublishError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    if secret {
        restrict_permissions(tmp.as_file())?;
    }
    tmp.persist(path).map_err(|e| PublishError::Io(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}
