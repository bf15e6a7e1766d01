//! Installation of a downloaded artifact.
//!
//! ```text
//! Idle -> Downloaded -> Decrypted -> Extracted -> Merged -> Promoted
//!            \______________\____________\__________\_____> Failed
//! ```
//!
//! Nothing under the live installation changes before `Promoted`. A failure
//! in any earlier stage removes the staging directory and leaves the
//! current release, its configuration and `version.txt` as they were. Once a
//! promotion journal is outstanding the staged tree belongs to recovery and
//! is kept.

use std::path::PathBuf;

use skiff_crypto::ArtifactKey;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::error::UpdateError;
use crate::fetch::StagedArtifact;
use crate::fsutil;
use crate::layout::{InstallLayout, MERGED_CONFIG_FILE};
use crate::merge::{self, ConfigDocument, MergeStats, ParseOptions};
use crate::promote::{self, PromotionJournal};

/// Installer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Idle,
    Downloaded,
    Decrypted,
    Extracted,
    Merged,
    Promoted,
    Failed,
}

/// Outcome of the configuration merge step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// The merged document replaced the live configuration.
    Merged(MergeStats),
    /// The template added nothing; the live file was not rewritten.
    Unchanged,
    /// The release ships no configuration template.
    NoTemplate,
    /// Merging failed; the live configuration was left alone.
    Skipped(String),
}

/// A successfully promoted release.
#[derive(Debug)]
pub struct InstalledRelease {
    pub version: String,
    pub release_dir: PathBuf,
    pub files: usize,
    pub merge: MergeStatus,
    pub transitions: Vec<InstallStage>,
}

/// An install that ended in [`InstallStage::Failed`].
#[derive(Debug, Error)]
#[error("install of {version} failed after {last_good:?}: {error}")]
pub struct InstallFailure {
    pub version: String,
    /// Last stage reached before the failure.
    pub last_good: InstallStage,
    #[source]
    pub error: UpdateError,
    pub transitions: Vec<InstallStage>,
}

/// Drives one artifact through the install stages.
pub struct Installer<'a> {
    layout: &'a InstallLayout,
    key: &'a ArtifactKey,
    template_name: &'a str,
    parse: ParseOptions,
    stage: InstallStage,
    transitions: Vec<InstallStage>,
}

impl<'a> Installer<'a> {
    pub fn new(
        layout: &'a InstallLayout,
        key: &'a ArtifactKey,
        template_name: &'a str,
        parse: ParseOptions,
    ) -> Self {
        Self {
            layout,
            key,
            template_name,
            parse,
            stage: InstallStage::Idle,
            transitions: vec![InstallStage::Idle],
        }
    }

    pub fn stage(&self) -> InstallStage {
        self.stage
    }

    /// Decrypt, extract, merge and promote `artifact`.
    pub fn install(mut self, artifact: StagedArtifact) -> Result<InstalledRelease, InstallFailure> {
        let version = artifact.version.clone();
        self.advance(InstallStage::Downloaded);

        let mut staging = None;
        match self.run(artifact, &mut staging) {
            Ok((release_dir, files, merge)) => Ok(InstalledRelease {
                version,
                release_dir,
                files,
                merge,
                transitions: self.transitions,
            }),
            Err(e) => {
                let last_good = self.stage;
                self.advance(InstallStage::Failed);
                error!(version = %version, stage = ?last_good, error = %e, "install failed");
                if let Some(dir) = staging {
                    if self.layout.journal_file().exists() {
                        warn!(path = ?dir, "promotion journal outstanding, keeping staged release");
                    } else if let Err(cleanup) = fsutil::remove_if_exists(&dir) {
                        warn!(path = ?dir, error = %cleanup, "failed to remove staging directory");
                    }
                }
                Err(InstallFailure {
                    version,
                    last_good,
                    error: e,
                    transitions: self.transitions,
                })
            }
        }
    }

    fn run(
        &mut self,
        artifact: StagedArtifact,
        staging_slot: &mut Option<PathBuf>,
    ) -> Result<(PathBuf, usize, MergeStatus), UpdateError> {
        let version = artifact.version.clone();

        let sealed = std::fs::read(artifact.path())?;
        let payload = self.key.open(&sealed)?;
        drop(artifact);
        self.advance(InstallStage::Decrypted);

        let staging = self.layout.new_staging_dir(&version);
        std::fs::create_dir_all(&staging)?;
        *staging_slot = Some(staging.clone());
        let summary = archive::unpack(&payload, &staging)?;
        drop(payload);
        info!(version = %version, files = summary.files, bytes = summary.bytes, "release extracted");
        self.advance(InstallStage::Extracted);

        let merged_config = staging.join(MERGED_CONFIG_FILE);
        let merge = self.merge_config(&staging, &merged_config);
        self.advance(InstallStage::Merged);

        let journal = PromotionJournal {
            version: version.clone(),
            staged_release: staging,
            release_dir: self.layout.release_dir(&version),
            staged_config: matches!(merge, MergeStatus::Merged(_)).then_some(merged_config),
            live_config: self.layout.live_config().to_path_buf(),
        };
        promote::promote(self.layout, &journal)?;
        *staging_slot = None;
        self.advance(InstallStage::Promoted);

        Ok((journal.release_dir, summary.files, merge))
    }

    fn merge_config(&self, staging: &std::path::Path, out: &std::path::Path) -> MergeStatus {
        let template_path = staging.join(self.template_name);
        if !template_path.is_file() {
            debug!(template = %self.template_name, "release ships no configuration template");
            return MergeStatus::NoTemplate;
        }

        let result = (|| -> Result<Option<MergeStats>, UpdateError> {
            let template = ConfigDocument::load_template(&template_path, &self.parse)?;
            let live = ConfigDocument::load_live(self.layout.live_config(), &self.parse)?;
            let (merged, stats) = merge::merge_with_stats(&live, &template);
            if !stats.changed() {
                return Ok(None);
            }
            merged.save(out)?;
            Ok(Some(stats))
        })();

        match result {
            Ok(None) => {
                debug!("configuration already up to date");
                MergeStatus::Unchanged
            }
            Ok(Some(stats)) => {
                info!(
                    added_sections = stats.added_sections,
                    added_keys = stats.added_keys,
                    filled = stats.filled_placeholders,
                    refreshed = stats.refreshed_defaults,
                    "configuration merged"
                );
                MergeStatus::Merged(stats)
            }
            Err(e) => {
                warn!(error = %e, "configuration merge skipped");
                MergeStatus::Skipped(e.to_string())
            }
        }
    }

    fn advance(&mut self, next: InstallStage) {
        debug!(from = ?self.stage, to = ?next, "install stage");
        self.stage = next;
        self.transitions.push(next);
    }
}
