//! Update session - one installation's update context.
//!
//! `UpdateSession` owns everything a cycle needs (configuration, layout, keys,
//! distribution source, scheduler, clock) and runs the pipeline:
//!
//! ```text
//! should_check_now -> check_for_update -> fetch -> install -> record_check_time
//! ```
//!
//! At most one cycle runs at a time. A trigger that arrives while a cycle is
//! in flight returns [`CycleOutcome::Busy`] without waiting.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::UpdaterConfig;
use crate::error::UpdateError;
use crate::fetch::PackageFetcher;
use crate::install::{InstallFailure, InstalledRelease, Installer};
use crate::keystore::KeyStore;
use crate::layout::InstallLayout;
use crate::merge::ParseOptions;
use crate::oracle::{CheckOutcome, VersionOracle};
use crate::promote;
use crate::scheduler::{Clock, SystemClock, UpdateScheduler};
use crate::source::{self, RemoteSource};
use crate::state::StateStore;

/// What the session is doing right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// Idle, no cycle in progress
    #[default]
    Idle,
    /// Fetching and verifying the manifest
    Checking,
    /// Downloading the artifact
    Downloading,
    /// Decrypting, extracting, merging, promoting
    Installing,
    /// A new release was promoted; the launcher should restart the program
    RestartRequired { version: String },
}

/// Result of [`UpdateSession::apply_detailed`].
#[derive(Debug)]
pub enum ApplyOutcome {
    /// No authenticated update; carries the reason.
    NoUpdate(CheckOutcome),
    /// The artifact could not be downloaded. Nothing was written.
    FetchFailed(UpdateError),
    /// Install stopped before promotion; the live installation is unchanged.
    InstallFailed(InstallFailure),
    /// The new release is promoted and recorded as current.
    Installed(InstalledRelease),
}

impl ApplyOutcome {
    /// Collapse into `(installed, version)`.
    pub fn into_pair(self) -> (bool, Option<String>) {
        match self {
            ApplyOutcome::Installed(release) => (true, Some(release.version)),
            _ => (false, None),
        }
    }

    /// Whether the distribution host was reached.
    fn reached_host(&self) -> bool {
        match self {
            ApplyOutcome::NoUpdate(check) => !check.is_unreachable(),
            ApplyOutcome::FetchFailed(e) => !e.is_transient(),
            ApplyOutcome::InstallFailed(_) | ApplyOutcome::Installed(_) => true,
        }
    }
}

/// Result of [`UpdateSession::run_cycle`].
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle holds the guard.
    Busy,
    /// Scheduled checks are disabled in the configuration.
    Disabled,
    /// The check interval has not elapsed.
    NotDue,
    /// The cycle ran to the end; the check time was recorded.
    Completed(ApplyOutcome),
    /// The cycle stopped on a local error; the check time was recorded.
    Aborted(UpdateError),
}

impl CycleOutcome {
    /// Whether a cycle actually ran (and recorded its check time).
    pub fn ran(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_) | CycleOutcome::Aborted(_))
    }

    /// Whether the cycle promoted a new release.
    pub fn installed(&self) -> Option<&str> {
        match self {
            CycleOutcome::Completed(ApplyOutcome::Installed(release)) => Some(&release.version),
            _ => None,
        }
    }
}

/// Update context for one installation.
pub struct UpdateSession {
    config: UpdaterConfig,
    layout: InstallLayout,
    state: StateStore,
    keys: KeyStore,
    source: Arc<dyn RemoteSource>,
    clock: Arc<dyn Clock>,
    scheduler: Mutex<UpdateScheduler>,
    cycle: Mutex<()>,
    status: Arc<RwLock<SessionStatus>>,
}

impl UpdateSession {
    /// Open the installation at `root`, reading `skiff.toml` and building the
    /// configured distribution source.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, UpdateError> {
        let root = root.into();
        let config = UpdaterConfig::load_from_root(&root)?;
        let source = source::from_config(&config.source)?;
        Self::with_parts(root, config, source, Arc::new(SystemClock))
    }

    /// Open the installation at `root` with an explicit source and clock.
    ///
    /// Completes any interrupted promotion and clears leftover update work
    /// before returning.
    pub fn with_parts(
        root: impl Into<PathBuf>,
        config: UpdaterConfig,
        source: Arc<dyn RemoteSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        let layout = InstallLayout::new(root, &config.install);
        layout.ensure_dirs()?;

        let report = promote::recover(&layout)?;
        if let Some(version) = &report.completed {
            info!(version = %version, "finished interrupted promotion");
        }

        let scheduler = UpdateScheduler::new(
            config.schedule.interval(),
            config.schedule.max_backoff(),
        );
        let keys = KeyStore::new(&layout, config.security.pinned_public_key.clone());

        info!(
            root = ?layout.root(),
            source = %source.describe(),
            "update session opened"
        );

        Ok(Self {
            state: StateStore::new(layout.clone()),
            keys,
            layout,
            source,
            clock,
            scheduler: Mutex::new(scheduler),
            cycle: Mutex::new(()),
            status: Arc::new(RwLock::new(SessionStatus::Idle)),
            config,
        })
    }

    /// Replace the scheduler, e.g. to disable jitter.
    pub fn set_scheduler(&mut self, scheduler: UpdateScheduler) {
        self.scheduler = Mutex::new(scheduler);
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn current_version(&self) -> Result<String, UpdateError> {
        self.state.current_version()
    }

    pub async fn status(&self) -> SessionStatus {
        self.status.read().await.clone()
    }

    /// Whether a promoted release is waiting for a restart.
    pub async fn restart_required(&self) -> bool {
        matches!(*self.status.read().await, SessionStatus::RestartRequired { .. })
    }

    /// `(true, remote)` when an authenticated, different version is
    /// published, `(false, local)` otherwise. Errors only when the key
    /// material cannot be provisioned or local state cannot be read.
    pub async fn check_for_update(&self) -> Result<(bool, String), UpdateError> {
        let local = self.state.current_version()?;
        Ok(self.check_detailed().await?.into_pair(&local))
    }

    /// [`check_for_update`](Self::check_for_update), keeping the reason.
    pub async fn check_detailed(&self) -> Result<CheckOutcome, UpdateError> {
        let local = self.state.current_version()?;
        let verifier = self
            .keys
            .load_or_bootstrap_public_key(self.source.as_ref())
            .await?;

        self.set_status(SessionStatus::Checking).await;
        let outcome = VersionOracle::new(&verifier)
            .check_detailed(&local, self.source.as_ref())
            .await;
        self.settle_status().await;
        Ok(outcome)
    }

    /// Install the published version if it differs from the local one.
    ///
    /// `(true, Some(version))` after a promotion, `(false, None)` when there
    /// is nothing to install or the install failed. A call made while a cycle
    /// is in flight returns `(false, None)` immediately.
    pub async fn apply_update_if_available(&self) -> Result<(bool, Option<String>), UpdateError> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("update cycle in flight, apply skipped");
            return Ok((false, None));
        };
        Ok(self.apply_detailed().await?.into_pair())
    }

    /// Check, download and install, reporting each outcome.
    ///
    /// The caller must hold the cycle guard.
    async fn apply_detailed(&self) -> Result<ApplyOutcome, UpdateError> {
        let symmetric_key = self.keys.load_or_create_symmetric_key()?;

        let version = match self.check_detailed().await? {
            CheckOutcome::Available(version) => version,
            other => return Ok(ApplyOutcome::NoUpdate(other)),
        };

        self.set_status(SessionStatus::Downloading).await;
        let fetcher = PackageFetcher::new(&self.layout, Some(self.config.source.max_artifact_bytes));
        let artifact = match fetcher.fetch(&version, self.source.as_ref()).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(version = %version, error = %e, "artifact download failed");
                self.settle_status().await;
                return Ok(ApplyOutcome::FetchFailed(e));
            }
        };
        info!(version = %version, bytes = artifact.size, sha256 = %artifact.sha256, "artifact downloaded");

        self.set_status(SessionStatus::Installing).await;
        let parse = ParseOptions {
            legacy_placeholder_prefix: self.config.install.legacy_placeholder_prefix.clone(),
        };
        let layout = self.layout.clone();
        let template_name = self.config.install.template_name.clone();
        // Decryption, extraction and the fsyncs of promotion block.
        let installed = tokio::task::spawn_blocking(move || {
            Installer::new(&layout, &symmetric_key, &template_name, parse).install(artifact)
        })
        .await
        .map_err(|e| UpdateError::Io(std::io::Error::other(format!("install task failed: {e}"))))?;
        let outcome = match installed {
            Ok(release) => {
                info!(version = %release.version, "update installed, restart required");
                self.set_status(SessionStatus::RestartRequired {
                    version: release.version.clone(),
                })
                .await;
                ApplyOutcome::Installed(release)
            }
            Err(failure) => {
                self.settle_status().await;
                ApplyOutcome::InstallFailed(failure)
            }
        };
        Ok(outcome)
    }

    /// Whether a scheduled cycle is due now.
    pub async fn should_check_now(&self) -> Result<bool, UpdateError> {
        let state = self.state.load()?;
        let scheduler = self.scheduler.lock().await;
        Ok(scheduler.should_check_now(&state, self.clock.now()))
    }

    /// Record the current time as the last completed cycle.
    pub async fn record_check_time(&self) -> Result<(), UpdateError> {
        let scheduler = self.scheduler.lock().await;
        scheduler.record_check_time(&self.state, self.clock.now())
    }

    /// Run one scheduled cycle if it is due.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.cycle_inner(false).await
    }

    /// Run one cycle now, ignoring the schedule (manual trigger).
    pub async fn run_cycle_now(&self) -> CycleOutcome {
        self.cycle_inner(true).await
    }

    async fn cycle_inner(&self, forced: bool) -> CycleOutcome {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("update cycle already in flight");
            return CycleOutcome::Busy;
        };

        if !forced {
            if !self.config.schedule.auto_check {
                return CycleOutcome::Disabled;
            }
            match self.should_check_now().await {
                Ok(true) => {}
                Ok(false) => return CycleOutcome::NotDue,
                Err(e) => warn!(error = %e, "could not read last check time, checking anyway"),
            }
        }

        info!(forced, "update cycle started");
        let result = self.apply_detailed().await;

        if let Err(e) = self.record_check_time().await {
            error!(error = %e, "failed to record check time");
        }

        match result {
            Ok(outcome) => {
                self.scheduler
                    .lock()
                    .await
                    .record_network_result(outcome.reached_host());
                info!(outcome = ?OutcomeSummary(&outcome), "update cycle completed");
                CycleOutcome::Completed(outcome)
            }
            Err(e) => {
                error!(error = %e, "update cycle aborted");
                if e.is_transient() {
                    self.scheduler.lock().await.record_network_result(false);
                }
                self.settle_status().await;
                CycleOutcome::Aborted(e)
            }
        }
    }

    async fn set_status(&self, status: SessionStatus) {
        *self.status.write().await = status;
    }

    /// Return to idle unless a restart is pending.
    async fn settle_status(&self) {
        let mut status = self.status.write().await;
        if !matches!(*status, SessionStatus::RestartRequired { .. }) {
            *status = SessionStatus::Idle;
        }
    }
}

/// Short form of an [`ApplyOutcome`] for logs.
struct OutcomeSummary<'a>(&'a ApplyOutcome);

impl std::fmt::Debug for OutcomeSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ApplyOutcome::NoUpdate(CheckOutcome::UpToDate) => f.write_str("up-to-date"),
            ApplyOutcome::NoUpdate(CheckOutcome::Unreachable(_)) => f.write_str("unreachable"),
            ApplyOutcome::NoUpdate(CheckOutcome::SignatureInvalid { .. }) => {
                f.write_str("signature-invalid")
            }
            ApplyOutcome::NoUpdate(_) => f.write_str("no-update"),
            ApplyOutcome::FetchFailed(_) => f.write_str("fetch-failed"),
            ApplyOutcome::InstallFailed(_) => f.write_str("install-failed"),
            ApplyOutcome::Installed(r) => write!(f, "installed {}", r.version),
        }
    }
}
