//! Persisted installation state.
//!
//! Two independent records: `version.txt` holds the current version,
//! `last_check.txt` the unix time of the last completed cycle. Both are
//! plain text and replaced atomically.

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::fsutil;
use crate::layout::InstallLayout;

/// Version assumed when no `version.txt` exists.
pub const INITIAL_VERSION: &str = "0.0.0";

/// Snapshot of the persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationState {
    pub current_version: String,
    pub last_check: Option<DateTime<Utc>>,
}

/// Reads and writes [`InstallationState`] records.
#[derive(Debug, Clone)]
pub struct StateStore {
    layout: InstallLayout,
}

impl StateStore {
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }

    pub fn load(&self) -> Result<InstallationState, UpdateError> {
        Ok(InstallationState {
            current_version: self.current_version()?,
            last_check: self.last_check()?,
        })
    }

    /// The recorded version, or [`INITIAL_VERSION`] on a fresh install.
    pub fn current_version(&self) -> Result<String, UpdateError> {
        match std::fs::read_to_string(self.layout.version_file()) {
            Ok(s) => {
                let v = s.trim();
                if v.is_empty() {
                    Ok(INITIAL_VERSION.to_string())
                } else {
                    Ok(v.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(INITIAL_VERSION.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_current_version(&self, version: &str) -> Result<(), UpdateError> {
        fsutil::write_atomic(&self.layout.version_file(), version.as_bytes())?;
        debug!(version = %version, "recorded current version");
        Ok(())
    }

    /// Time of the last completed cycle.
    ///
    /// Accepts integer seconds and the older fractional form. An unreadable
    /// record is logged and treated as "never checked".
    pub fn last_check(&self) -> Result<Option<DateTime<Utc>>, UpdateError> {
        let raw = match std::fs::read_to_string(self.layout.last_check_file()) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_timestamp(raw.trim());
        if parsed.is_none() {
            warn!(content = %raw.trim(), "ignoring unreadable last_check record");
        }
        Ok(parsed)
    }

    pub fn set_last_check(&self, at: DateTime<Utc>) -> Result<(), UpdateError> {
        let secs = at.timestamp().to_string();
        fsutil::write_atomic(&self.layout.last_check_file(), secs.as_bytes())?;
        debug!(last_check = %at, "recorded check time");
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    let secs = raw.parse::<f64>().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}
