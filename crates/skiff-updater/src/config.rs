//! Configuration structures for the update system.
//!
//! Loaded from `skiff.toml` in the installation root. Every field has a
//! default, so an empty or missing file yields a usable configuration that
//! only lacks a distribution source.
//!
//! ```toml
//! [source]
//! base_url = "https://updates.example.com/app/"
//! timeout_seconds = 30
//!
//! [schedule]
//! check_interval_hours = 24
//!
//! [security]
//! pinned_public_key = """
//! -----BEGIN PUBLIC KEY-----
//! ...
//! -----END PUBLIC KEY-----
//! """
//!
//! [install]
//! config_file = "config.toml"
//! entrypoint = "bin/app"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::fsutil;

/// Default configuration file name inside the installation root.
pub const CONFIG_FILE_NAME: &str = "skiff.toml";

/// Main updater configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Where releases are published
    #[serde(default)]
    pub source: SourceConfig,

    /// How often update cycles may run
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Trust anchors
    #[serde(default)]
    pub security: SecurityConfig,

    /// Installation layout and configuration merge settings
    #[serde(default)]
    pub install: InstallConfig,

    /// Logging for the binaries that embed the updater
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `skiff.toml` from an installation root, falling back to defaults
    /// when the file does not exist.
    pub fn load_from_root(root: &Path) -> Result<Self, UpdateError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        fsutil::write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Validate values that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.source.base_url.is_some() && self.source.directory.is_some() {
            return Err(UpdateError::Config(
                "source.base_url and source.directory are mutually exclusive".to_string(),
            ));
        }
        if let Some(url) = &self.source.base_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| UpdateError::Config(format!("invalid source.base_url: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(UpdateError::Config(format!(
                    "source.base_url must be http(s), got {}",
                    parsed.scheme()
                )));
            }
        }
        if self.source.timeout_seconds == 0 {
            return Err(UpdateError::Config(
                "source.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.schedule.check_interval_hours == 0 {
            return Err(UpdateError::Config(
                "schedule.check_interval_hours must be at least 1".to_string(),
            ));
        }
        if self.schedule.max_backoff_hours < self.schedule.check_interval_hours {
            return Err(UpdateError::Config(
                "schedule.max_backoff_hours must not be below check_interval_hours".to_string(),
            ));
        }
        if let Some(entry) = &self.install.entrypoint {
            if entry.is_absolute() {
                return Err(UpdateError::Config(
                    "install.entrypoint must be relative to the release directory".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Distribution source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Static host serving the distribution root
    #[serde(default)]
    pub base_url: Option<String>,

    /// Local directory holding a distribution root (offline media)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// User agent sent to the host
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Largest artifact accepted, in bytes
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            directory: None,
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval between update checks in hours
    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u32,

    /// Upper bound for the backed-off interval after network failures
    #[serde(default = "default_max_backoff")]
    pub max_backoff_hours: u32,

    /// Whether scheduled cycles run at all (manual checks still work)
    #[serde(default = "default_true")]
    pub auto_check: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_hours: default_check_interval(),
            max_backoff_hours: default_max_backoff(),
            auto_check: true,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval_hours) * 3600)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_backoff_hours) * 3600)
    }
}

/// Trust configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Manifest verification key provisioned at build or install time
    /// (SubjectPublicKeyInfo PEM). When set, the key is never fetched from
    /// the distribution host.
    #[serde(default)]
    pub pinned_public_key: Option<String>,
}

/// Installation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Live configuration document, relative to the installation root
    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,

    /// Name of the shipped configuration template inside a release
    #[serde(default = "default_template_name")]
    pub template_name: String,

    /// Values starting with this prefix are read as unset placeholders.
    /// Only needed for documents written by older releases.
    #[serde(default)]
    pub legacy_placeholder_prefix: Option<String>,

    /// Program the launcher starts, relative to the release directory
    #[serde(default)]
    pub entrypoint: Option<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            config_file: default_config_file(),
            template_name: default_template_name(),
            legacy_placeholder_prefix: None,
            entrypoint: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("skiff-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_artifact_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_check_interval() -> u32 {
    24 // Daily
}

fn default_max_backoff() -> u32 {
    24 * 7
}

fn default_true() -> bool {
    true
}

fn default_config_file() -> PathBuf {
    PathBuf::from("config.toml")
}

fn default_template_name() -> String {
    "config.toml".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
