//! Encrypted artifact download.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tracing::{debug, info};

use crate::error::UpdateError;
use crate::layout::InstallLayout;
use crate::source::RemoteSource;

/// A downloaded, still-encrypted artifact in the update working directory.
///
/// The file is removed when this value is dropped unless [`keep`] is called.
///
/// [`keep`]: StagedArtifact::keep
#[derive(Debug)]
pub struct StagedArtifact {
    pub version: String,
    path: TempPath,
    pub size: u64,
    /// Hex SHA-256 of the encrypted bytes, for diagnostics.
    pub sha256: String,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach the file from this value so it outlives it.
    pub fn keep(self) -> Result<PathBuf, UpdateError> {
        self.path.keep().map_err(|e| UpdateError::Io(e.error))
    }
}

/// Downloads `<version>/update.tar.gz.enc` into the update working directory.
pub struct PackageFetcher<'a> {
    layout: &'a InstallLayout,
    max_bytes: Option<u64>,
}

impl<'a> PackageFetcher<'a> {
    pub fn new(layout: &'a InstallLayout, max_bytes: Option<u64>) -> Self {
        Self { layout, max_bytes }
    }

    /// Fetch the artifact for `version`.
    ///
    /// One request, no retry. Nothing touches the filesystem until the whole
    /// body is in memory; the body then lands in a fresh file that is fsynced
    /// before this returns.
    pub async fn fetch(
        &self,
        version: &str,
        source: &dyn RemoteSource,
    ) -> Result<StagedArtifact, UpdateError> {
        let remote_path = skiff_crypto::artifact_path(version)?;

        info!(version = %version, source = %source.describe(), "downloading update");
        let body = source
            .fetch(&remote_path, self.max_bytes)
            .await
            .map_err(UpdateError::Fetch)?;

        let sha256 = hex::encode(Sha256::digest(&body));
        let path = self.layout.new_download_path(version);
        std::fs::create_dir_all(self.layout.updates_dir())?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        // From here on the file is owned by the TempPath and removed on error.
        let temp = TempPath::from_path(&path);
        file.write_all(&body)?;
        file.sync_all()?;

        debug!(path = ?path, bytes = body.len(), sha256 = %sha256, "artifact staged");
        Ok(StagedArtifact {
            version: version.to_string(),
            path: temp,
            size: body.len() as u64,
            sha256,
        })
    }
}
