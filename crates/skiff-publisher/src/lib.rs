//! skiff publisher - offline release production
//!
//! This crate turns a release directory into the files a skiff client
//! consumes from its distribution root:
//! - `latest_version.json` with an Ed25519 signature over the version
//! - `public_key.pem` for trust-on-first-use clients
//! - `<version>/update.tar.gz.enc`, the sealed release archive
//!
//! Key generation and a client-side style verification of a distribution
//! root are provided as well.

pub mod bundle;
pub mod cli;
pub mod error;
pub mod keys;
pub mod publish;

pub use cli::Cli;
pub use error::PublishError;
pub use keys::{KeyMaterial, ENCRYPTION_KEY_FILE, PRIVATE_KEY_FILE};
pub use publish::{publish, verify_distribution, PublishReport, VerifyReport};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error (bad input, IO failure, missing keys)
/// - 2: Verification failed - the distribution root does not check out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// Distribution verification failed (exit code 2)
    VerificationFailed = 2,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::VerificationFailed => "VERIFICATION_FAILED",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::GeneralError), 1);
        assert_eq!(i32::from(ExitCode::VerificationFailed), 2);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::VerificationFailed.name(), "VERIFICATION_FAILED");
    }
}
