//! Crash-safe promotion of a staged release.
//!
//! Promotion is driven by a journal written before the first live change:
//!
//! 1. write `promotion.json`
//! 2. rename the staging directory to `releases/<version>/`
//! 3. move the merged configuration over the live one
//! 4. write `version.txt`
//! 5. remove `promotion.json`
//!
//! Every step can be repeated, so [`recover`] finishes an interrupted
//! promotion by replaying the journal from the top. If step 2 fails the
//! live installation is untouched, so [`promote`] withdraws the journal and
//! the attempt fails cleanly. A journal whose trees are both gone can never
//! be completed; [`recover`] drops it instead of failing every open.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::UpdateError;
use crate::fsutil;
use crate::layout::InstallLayout;
use crate::state::StateStore;

/// Durable record of an in-flight promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionJournal {
    pub version: String,
    pub staged_release: PathBuf,
    pub release_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_config: Option<PathBuf>,
    pub live_config: PathBuf,
}

impl PromotionJournal {
    fn load(path: &Path) -> Result<Option<Self>, UpdateError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                UpdateError::Promotion(format!("unreadable promotion journal: {e}"))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Refuse journals that point outside the installation.
    fn check(&self, layout: &InstallLayout) -> Result<(), UpdateError> {
        skiff_crypto::validate_version(&self.version)?;
        if !self.staged_release.starts_with(layout.updates_dir())
            || self.release_dir != layout.release_dir(&self.version)
        {
            return Err(UpdateError::Promotion(format!(
                "promotion journal for {} points outside the installation",
                self.version
            )));
        }
        if let Some(config) = &self.staged_config {
            if !config.starts_with(&self.staged_release) {
                return Err(UpdateError::Promotion(
                    "staged configuration is not inside the staged release".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// What [`recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Version whose interrupted promotion was completed.
    pub completed: Option<String>,
    /// Version whose journal was dropped because nothing was left to promote.
    pub abandoned: Option<String>,
    /// Stray downloads and staging directories removed.
    pub discarded: usize,
}

/// Journal and apply a promotion.
pub fn promote(layout: &InstallLayout, journal: &PromotionJournal) -> Result<(), UpdateError> {
    journal.check(layout)?;
    let bytes = serde_json::to_vec_pretty(journal)?;
    fsutil::write_atomic(&layout.journal_file(), &bytes)?;
    debug!(version = %journal.version, "promotion journal written");

    if let Err(e) = move_release(layout, journal) {
        if let Err(withdraw) = fsutil::remove_if_exists(&layout.journal_file()) {
            warn!(error = %withdraw, "failed to withdraw promotion journal");
        }
        return Err(e);
    }
    finish(layout, journal)
}

/// Finish any interrupted promotion and clear leftover update work.
pub fn recover(layout: &InstallLayout) -> Result<RecoveryReport, UpdateError> {
    let mut report = RecoveryReport::default();

    if let Some(journal) = PromotionJournal::load(&layout.journal_file())? {
        journal.check(layout)?;
        if !journal.staged_release.exists() && !journal.release_dir.is_dir() {
            warn!(version = %journal.version, "dropping promotion journal with nothing left to promote");
            fsutil::remove_if_exists(&layout.journal_file())?;
            fsutil::sync_dir(layout.root())?;
            report.abandoned = Some(journal.version);
        } else {
            warn!(version = %journal.version, "completing interrupted promotion");
            move_release(layout, &journal)?;
            finish(layout, &journal)?;
            report.completed = Some(journal.version);
        }
    }

    report.discarded = layout.discard_stray_work(None)?;
    if report.discarded > 0 {
        info!(count = report.discarded, "discarded stray update work");
    }
    Ok(report)
}

fn move_release(layout: &InstallLayout, journal: &PromotionJournal) -> Result<(), UpdateError> {
    if journal.staged_release.exists() {
        fsutil::remove_if_exists(&journal.release_dir)?;
        std::fs::create_dir_all(layout.releases_dir())?;
        fsutil::rename_durable(&journal.staged_release, &journal.release_dir)
            .map_err(|e| UpdateError::Promotion(format!("moving release into place: {e}")))?;
        debug!(path = ?journal.release_dir, "release moved into place");
    } else if !journal.release_dir.is_dir() {
        return Err(UpdateError::Promotion(format!(
            "neither staged nor promoted tree exists for {}",
            journal.version
        )));
    }
    Ok(())
}

fn finish(layout: &InstallLayout, journal: &PromotionJournal) -> Result<(), UpdateError> {
    if let Some(staged_config) = &journal.staged_config {
        // The merged config travels with the release tree once it is renamed.
        let staged_config = match staged_config.strip_prefix(&journal.staged_release) {
            Ok(relative) if !staged_config.exists() => journal.release_dir.join(relative),
            _ => staged_config.clone(),
        };
        if staged_config.exists() {
            if let Some(parent) = journal.live_config.parent() {
                std::fs::create_dir_all(parent)?;
            }
            fsutil::rename_durable(&staged_config, &journal.live_config)
                .map_err(|e| UpdateError::Promotion(format!("replacing live config: {e}")))?;
            debug!(path = ?journal.live_config, "live configuration replaced");
        }
    }

    StateStore::new(layout.clone()).set_current_version(&journal.version)?;

    fsutil::remove_if_exists(&layout.journal_file())?;
    fsutil::sync_dir(layout.root())?;
    info!(version = %journal.version, "release promoted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallConfig;
    use tempfile::TempDir;

    fn staged(layout: &InstallLayout, version: &str) -> PromotionJournal {
        layout.ensure_dirs().unwrap();
        let staging = layout.new_staging_dir(version);
        std::fs::create_dir_all(staging.join("bin")).unwrap();
        std::fs::write(staging.join("bin/app"), version).unwrap();
        let merged = staging.join(crate::layout::MERGED_CONFIG_FILE);
        std::fs::write(&merged, "[A]\nk = \"merged\"\n").unwrap();

        PromotionJournal {
            version: version.to_string(),
            staged_release: staging,
            release_dir: layout.release_dir(version),
            staged_config: Some(merged),
            live_config: layout.live_config().to_path_buf(),
        }
    }

    #[test]
    fn test_promote_applies_every_step() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        let journal = staged(&layout, "1.0.1");

        promote(&layout, &journal).unwrap();

        assert_eq!(
            std::fs::read_to_string(layout.version_file()).unwrap(),
            "1.0.1"
        );
        assert_eq!(
            std::fs::read_to_string(layout.release_dir("1.0.1").join("bin/app")).unwrap(),
            "1.0.1"
        );
        assert!(std::fs::read_to_string(layout.live_config())
            .unwrap()
            .contains("merged"));
        assert!(!journal.staged_release.exists());
        assert!(!layout.journal_file().exists());
    }

    fn write_journal(layout: &InstallLayout, journal: &PromotionJournal) {
        fsutil::write_atomic(
            &layout.journal_file(),
            &serde_json::to_vec(journal).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_recover_after_journal_step() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        StateStore::new(layout.clone())
            .set_current_version("1.0.0")
            .unwrap();
        let journal = staged(&layout, "1.0.1");
        write_journal(&layout, &journal);
        // A leftover release dir from an older attempt gets replaced.
        std::fs::create_dir_all(layout.release_dir("1.0.1").join("junk")).unwrap();

        let report = recover(&layout).unwrap();
        assert_eq!(report.completed.as_deref(), Some("1.0.1"));
        assert_eq!(
            std::fs::read_to_string(layout.version_file()).unwrap(),
            "1.0.1"
        );
        assert!(layout.release_dir("1.0.1").join("bin/app").exists());
        assert!(!layout.release_dir("1.0.1").join("junk").exists());
        assert!(!layout.journal_file().exists());
    }

    #[test]
    fn test_recover_after_release_step() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        std::fs::write(layout.live_config(), "[A]\nk = \"old\"\n").unwrap();
        let journal = staged(&layout, "2.0.0");
        write_journal(&layout, &journal);
        // Crash after the rename: the merged config now sits in the release.
        std::fs::create_dir_all(layout.releases_dir()).unwrap();
        std::fs::rename(&journal.staged_release, &journal.release_dir).unwrap();

        recover(&layout).unwrap();
        assert_eq!(
            StateStore::new(layout.clone()).current_version().unwrap(),
            "2.0.0"
        );
        assert!(std::fs::read_to_string(layout.live_config())
            .unwrap()
            .contains("merged"));
        assert!(!journal
            .release_dir
            .join(crate::layout::MERGED_CONFIG_FILE)
            .exists());
    }

    #[test]
    fn test_recover_drops_journal_without_trees() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        StateStore::new(layout.clone())
            .set_current_version("1.0.0")
            .unwrap();
        std::fs::write(layout.live_config(), "[A]\nk = \"old\"\n").unwrap();
        let journal = staged(&layout, "1.0.1");
        write_journal(&layout, &journal);
        std::fs::remove_dir_all(&journal.staged_release).unwrap();

        let report = recover(&layout).unwrap();
        assert_eq!(report.completed, None);
        assert_eq!(report.abandoned.as_deref(), Some("1.0.1"));
        assert!(!layout.journal_file().exists());
        assert_eq!(
            std::fs::read_to_string(layout.version_file()).unwrap(),
            "1.0.0"
        );
        assert_eq!(
            std::fs::read_to_string(layout.live_config()).unwrap(),
            "[A]\nk = \"old\"\n"
        );

        // Later opens are unaffected.
        assert_eq!(recover(&layout).unwrap(), RecoveryReport::default());
    }

    #[test]
    fn test_failed_release_move_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        StateStore::new(layout.clone())
            .set_current_version("1.0.0")
            .unwrap();
        std::fs::write(layout.live_config(), "[A]\nk = \"old\"\n").unwrap();
        let journal = staged(&layout, "1.0.1");
        fsutil::remove_if_exists(&layout.releases_dir()).unwrap();
        std::fs::write(layout.releases_dir(), "not a directory").unwrap();

        assert!(promote(&layout, &journal).is_err());
        assert!(!layout.journal_file().exists());
        assert!(journal.staged_release.is_dir());
        assert_eq!(
            std::fs::read_to_string(layout.version_file()).unwrap(),
            "1.0.0"
        );
        assert_eq!(
            std::fs::read_to_string(layout.live_config()).unwrap(),
            "[A]\nk = \"old\"\n"
        );
    }

    #[test]
    fn test_recover_without_journal_discards_strays() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        let journal = staged(&layout, "1.0.1");

        let report = recover(&layout).unwrap();
        assert_eq!(report.completed, None);
        assert_eq!(report.discarded, 1);
        assert!(!journal.staged_release.exists());
        assert!(!layout.version_file().exists());
    }

    #[test]
    fn test_journal_outside_installation_rejected() {
        let dir = TempDir::new().unwrap();
        let layout = InstallLayout::new(dir.path(), &InstallConfig::default());
        let mut journal = staged(&layout, "1.0.1");
        journal.release_dir = dir.path().join("elsewhere");

        assert!(matches!(
            promote(&layout, &journal),
            Err(UpdateError::Promotion(_))
        ));
        assert!(!layout.journal_file().exists());
    }
}
