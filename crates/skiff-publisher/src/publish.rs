//! Distribution root emission and verification.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use skiff_crypto::{artifact_path, ManifestVerifier, VersionManifest, MANIFEST_FILE, PUBLIC_KEY_FILE};
use tracing::{debug, info};

use crate::bundle::{self, FILE_LIST};
use crate::error::PublishError;
use crate::keys::{write_file, KeyMaterial};

/// What [`publish`] wrote.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub version: String,
    pub artifact: PathBuf,
    pub artifact_bytes: u64,
    pub artifact_sha256: String,
    pub files: Vec<String>,
}

/// What [`verify_distribution`] found.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub version: String,
    pub files: Vec<String>,
}

/// Bundle `release_dir`, seal it and publish it as `version` under `dist`.
///
/// The artifact is written before the manifest, so a client that sees the
/// new manifest always finds the artifact it names.
pub fn publish(
    release_dir: &Path,
    version: &str,
    keys: &KeyMaterial,
    dist: &Path,
) -> Result<PublishReport, PublishError> {
    let relative = artifact_path(version)?;
    let manifest = VersionManifest::signed(version, &keys.signer)?;

    let files = bundle::enumerate_release(release_dir)?;
    let archive = bundle::bundle(release_dir, &files)?;
    debug!(files = files.len(), bytes = archive.len(), "release bundled");
    let sealed = keys.artifact_key.seal(&archive)?;

    let artifact = dist.join(&relative);
    std::fs::create_dir_all(dist.join(version))?;
    write_file(&artifact, &sealed, false)?;
    write_file(
        &dist.join(PUBLIC_KEY_FILE),
        keys.verifier().to_public_key_pem()?.as_bytes(),
        false,
    )?;
    write_file(&dist.join(MANIFEST_FILE), manifest.to_json()?.as_bytes(), false)?;

    let report = PublishReport {
        version: version.to_string(),
        artifact,
        artifact_bytes: sealed.len() as u64,
        artifact_sha256: hex::encode(Sha256::digest(&sealed)),
        files,
    };
    info!(
        version = %report.version,
        files = report.files.len(),
        bytes = report.artifact_bytes,
        "release published"
    );
    Ok(report)
}

/// Check a distribution root the way a client would: the manifest verifies,
/// the published public key matches, and the artifact opens and lists its
/// files.
pub fn verify_distribution(dist: &Path, keys: &KeyMaterial) -> Result<VerifyReport, PublishError> {
    let verifier = keys.verifier();

    let published_key = std::fs::read_to_string(dist.join(PUBLIC_KEY_FILE))?;
    if ManifestVerifier::from_public_key_pem(&published_key)? != verifier {
        return Err(PublishError::Verification(
            "published public key does not match the signing key".to_string(),
        ));
    }

    let manifest = VersionManifest::from_json(&std::fs::read(dist.join(MANIFEST_FILE))?)?;
    manifest
        .verify(&verifier)
        .map_err(|e| PublishError::Verification(format!("manifest: {e}")))?;

    let sealed = std::fs::read(dist.join(artifact_path(&manifest.version)?))?;
    let archive = keys
        .artifact_key
        .open(&sealed)
        .map_err(|e| PublishError::Verification(format!("artifact: {e}")))?;

    let mut tar = tar::Archive::new(GzDecoder::new(&archive[..]));
    let mut files = Vec::new();
    let mut listed = None;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if path == FILE_LIST {
            let mut list = String::new();
            entry.read_to_string(&mut list)?;
            listed = Some(list.lines().map(str::to_string).collect::<Vec<_>>());
        } else {
            files.push(path);
        }
    }

    match listed {
        Some(listed) if listed == files => {}
        Some(_) => {
            return Err(PublishError::Verification(format!(
                "{FILE_LIST} does not match the archive contents"
            )))
        }
        None => {
            return Err(PublishError::Verification(format!(
                "archive has no {FILE_LIST}"
            )))
        }
    }

    info!(version = %manifest.version, files = files.len(), "distribution verified");
    Ok(VerifyReport {
        version: manifest.version,
        files,
    })
}
