//! # skiff-launcher
//!
//! Stage-then-relaunch front end for a skiff installation.
//!
//! The updater never swaps code inside a running process. It promotes a new
//! release and records it in `version.txt`; the program then exits with
//! [`RESTART_EXIT_CODE`]. The launcher owns the process lifetime: before every
//! start it completes any interrupted promotion, removes releases that are no
//! longer current and starts `releases/<version>/<entrypoint>`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use skiff_updater::{
    promote, CycleOutcome, InstallLayout, StateStore, UpdateError, UpdateSession, UpdaterConfig,
    RESTART_EXIT_CODE,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable carrying the installation root to the child.
pub const ROOT_ENV: &str = "SKIFF_ROOT";
/// Environment variable carrying the running version to the child.
pub const VERSION_ENV: &str = "SKIFF_VERSION";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("install.entrypoint is not configured")]
    NoEntrypoint,

    #[error("release {version} has no entrypoint at {path}")]
    MissingRelease { version: String, path: PathBuf },

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gave up after {0} consecutive restarts")]
    TooManyRestarts(u32),

    #[error("child terminated by a signal")]
    Signaled,

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The program to start for the current release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub version: String,
    pub program: PathBuf,
}

/// Bring the installation at `root` to a consistent state and resolve what to
/// start.
pub fn prepare(root: &Path) -> Result<LaunchTarget, LaunchError> {
    let config = UpdaterConfig::load_from_root(root)?;
    let layout = InstallLayout::new(root, &config.install);

    let report = promote::recover(&layout)?;
    if let Some(version) = report.completed {
        info!(version = %version, "finished interrupted promotion");
    }

    let version = StateStore::new(layout.clone()).current_version()?;
    let pruned = layout.prune_releases(&version);
    if pruned > 0 {
        info!(count = pruned, current = %version, "pruned old releases");
    }

    let entrypoint = config.install.entrypoint.ok_or(LaunchError::NoEntrypoint)?;
    let program = layout.release_dir(&version).join(entrypoint);
    if !program.is_file() {
        return Err(LaunchError::MissingRelease {
            version,
            path: program,
        });
    }
    Ok(LaunchTarget { version, program })
}

/// Run one scheduled update cycle before the first start.
///
/// A failed cycle is not fatal to the launch; the outcome is returned for
/// logging.
pub fn update_before_launch(root: &Path) -> Result<CycleOutcome, LaunchError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let session = UpdateSession::open(root)?;
    Ok(runtime.block_on(session.run_cycle()))
}

/// Starts the current release and relaunches it while it asks for a restart.
#[derive(Debug, Clone)]
pub struct Launcher {
    root: PathBuf,
    args: Vec<OsString>,
    max_restarts: u32,
}

impl Launcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            args: Vec::new(),
            max_restarts: 5,
        }
    }

    /// Arguments passed to every start of the child.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Restart requests tolerated while the recorded version stays the same.
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    /// Run until the child exits with anything but [`RESTART_EXIT_CODE`].
    ///
    /// Returns the child's final exit code.
    pub fn run(&self) -> Result<i32, LaunchError> {
        let mut restarts = 0;
        let mut previous: Option<String> = None;
        loop {
            let target = prepare(&self.root)?;
            if previous.as_deref() != Some(target.version.as_str()) {
                restarts = 0;
            }
            info!(version = %target.version, program = ?target.program, "starting release");

            let status = Command::new(&target.program)
                .args(&self.args)
                .current_dir(&self.root)
                .env(ROOT_ENV, &self.root)
                .env(VERSION_ENV, &target.version)
                .status()
                .map_err(|source| LaunchError::Spawn {
                    path: target.program.clone(),
                    source,
                })?;

            match status.code() {
                Some(RESTART_EXIT_CODE) => {
                    restarts += 1;
                    if restarts > self.max_restarts {
                        warn!(restarts, "restart limit reached");
                        return Err(LaunchError::TooManyRestarts(self.max_restarts));
                    }
                    info!(version = %target.version, "release asked for a restart");
                    previous = Some(target.version);
                }
                Some(code) => {
                    debug!(code, "child exited");
                    return Ok(code);
                }
                None => return Err(LaunchError::Signaled),
            }
        }
    }
}
