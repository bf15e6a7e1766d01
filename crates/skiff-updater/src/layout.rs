//! On-disk layout of an installation.
//!
//! ```text
//! <root>/
//! ├── skiff.toml            updater configuration
//! ├── config.toml           live application configuration
//! ├── version.txt           current version
//! ├── last_check.txt        unix seconds of the last completed cycle
//! ├── promotion.json        present only while a promotion is in flight
//! ├── keys/
//! │   ├── encryption_key.bin
//! │   └── public_key.pem
//! ├── releases/<version>/   promoted release trees
//! └── updates/              downloads and staging directories
//! ```

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::InstallConfig;
use crate::fsutil;

pub const VERSION_FILE: &str = "version.txt";
pub const LAST_CHECK_FILE: &str = "last_check.txt";
pub const JOURNAL_FILE: &str = "promotion.json";
pub const SYMMETRIC_KEY_FILE: &str = "encryption_key.bin";
pub const CACHED_PUBLIC_KEY_FILE: &str = "public_key.pem";
pub const MERGED_CONFIG_FILE: &str = ".merged-config.toml";

const DOWNLOAD_PREFIX: &str = "download-";
const STAGING_PREFIX: &str = "staging-";

/// Paths of one installation.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
    config_file: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, install: &InstallConfig) -> Self {
        let root = root.into();
        let config_file = if install.config_file.is_absolute() {
            install.config_file.clone()
        } else {
            root.join(&install.config_file)
        };
        Self { root, config_file }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    pub fn last_check_file(&self) -> PathBuf {
        self.root.join(LAST_CHECK_FILE)
    }

    pub fn journal_file(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    /// The live application configuration document.
    pub fn live_config(&self) -> &Path {
        &self.config_file
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    pub fn symmetric_key_file(&self) -> PathBuf {
        self.keys_dir().join(SYMMETRIC_KEY_FILE)
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.keys_dir().join(CACHED_PUBLIC_KEY_FILE)
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    pub fn release_dir(&self, version: &str) -> PathBuf {
        self.releases_dir().join(version)
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.root.join("updates")
    }

    /// Fresh, unused download path for `version`.
    pub fn new_download_path(&self, version: &str) -> PathBuf {
        self.updates_dir()
            .join(format!("{DOWNLOAD_PREFIX}{version}-{}.enc", nonce()))
    }

    /// Fresh, unused staging directory for `version`.
    pub fn new_staging_dir(&self, version: &str) -> PathBuf {
        self.updates_dir()
            .join(format!("{STAGING_PREFIX}{version}-{}", nonce()))
    }

    /// Create the directories every installation needs.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.keys_dir())?;
        std::fs::create_dir_all(self.releases_dir())?;
        std::fs::create_dir_all(self.updates_dir())?;
        Ok(())
    }

    /// Remove leftover downloads and staging directories, except `keep`.
    ///
    /// Returns the number of entries removed.
    pub fn discard_stray_work(&self, keep: Option<&Path>) -> std::io::Result<usize> {
        let entries = match std::fs::read_dir(self.updates_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(DOWNLOAD_PREFIX) || name.starts_with(STAGING_PREFIX)) {
                continue;
            }
            if keep.is_some_and(|k| k == path) {
                continue;
            }
            debug!(path = ?path, "discarding stray update work");
            fsutil::remove_if_exists(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete promoted releases other than `current`.
    ///
    /// Only the current version is tracked, so older trees are dead weight once
    /// nothing runs from them. Failures are logged and skipped.
    pub fn prune_releases(&self, current: &str) -> usize {
        let entries = match std::fs::read_dir(self.releases_dir()) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut pruned = 0;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy() == current {
                continue;
            }
            match fsutil::remove_if_exists(&entry.path()) {
                Ok(()) => pruned += 1,
                Err(e) => warn!(path = ?entry.path(), error = %e, "failed to prune release"),
            }
        }
        pruned
    }
}

fn nonce() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}
