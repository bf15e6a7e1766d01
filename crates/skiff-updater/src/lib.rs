//! # skiff-updater
//!
//! Secure self-update pipeline for a deployed client.
//!
//! This crate handles:
//! - Per-installation key material (artifact key, manifest verification key)
//! - Authenticated version checks against a static distribution root
//! - Download of sealed release artifacts
//! - Decryption, extraction and journaled promotion of a release
//! - Non-destructive merge of the shipped configuration template
//! - Scheduling of update cycles with backoff
//!
//! ## Security
//!
//! - A manifest is acted on only after its signature verifies
//! - Any failure before promotion leaves the live installation untouched
//! - Archive entries cannot escape the staging directory
//! - Values the user set in the configuration are never overwritten
//!
//! ## Restarting
//!
//! Promotion never swaps code inside a running process. A program that sees
//! [`UpdateSession::restart_required`] exits with [`RESTART_EXIT_CODE`] and
//! `skiff-launcher` starts the newly promoted release.

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod install;
pub mod keystore;
pub mod layout;
pub mod merge;
pub mod oracle;
pub mod promote;
#[cfg(test)]
mod proptests;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod state;

/// Exit status a program uses to ask the launcher for a restart into the
/// current release (`EX_TEMPFAIL`).
pub const RESTART_EXIT_CODE: i32 = 75;

// Re-export main types for convenience
pub use config::{
    InstallConfig, LoggingConfig, ScheduleConfig, SecurityConfig, SourceConfig, UpdaterConfig,
    CONFIG_FILE_NAME,
};
pub use error::UpdateError;
pub use fetch::{PackageFetcher, StagedArtifact};
pub use install::{InstallFailure, InstallStage, InstalledRelease, Installer, MergeStatus};
pub use keystore::KeyStore;
pub use layout::InstallLayout;
pub use merge::{merge, ConfigDocument, FieldValue, MergeError, MergeStats, ParseOptions, Section};
pub use oracle::{CheckOutcome, VersionOracle};
pub use promote::{recover, PromotionJournal, RecoveryReport};
pub use scheduler::{Clock, ManualClock, SystemClock, UpdateScheduler};
pub use session::{ApplyOutcome, CycleOutcome, SessionStatus, UpdateSession};
pub use source::{DirectorySource, HttpSource, RemoteSource, SourceError};
pub use state::{InstallationState, StateStore, INITIAL_VERSION};
