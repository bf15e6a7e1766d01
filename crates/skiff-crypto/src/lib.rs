//! # skiff-crypto
//!
//! Wire-level primitives shared by the skiff client and the offline publisher.
//!
//! - [`artifact`]: ChaCha20-Poly1305 sealing of release archives with a
//!   pre-shared, per-installation key
//! - [`signing`]: Ed25519 signatures over the published version string, with
//!   keys carried as PEM
//! - [`manifest`]: the `latest_version.json` record and the distribution
//!   layout both sides agree on

#![forbid(unsafe_code)]

pub mod artifact;
pub mod error;
pub mod manifest;
pub mod signing;

#[cfg(test)]
mod proptests;

pub use artifact::{ArtifactKey, ARTIFACT_KEY_LEN};
pub use error::CryptoError;
pub use manifest::{
    artifact_path, validate_version, VersionManifest, ARTIFACT_FILE, MANIFEST_FILE,
    PUBLIC_KEY_FILE,
};
pub use signing::{ManifestSigner, ManifestVerifier};
