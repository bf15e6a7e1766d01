//! Release archive extraction.
//!
//! Releases are gzip-compressed tarballs. Only plain files and directories
//! with relative paths are accepted; anything that could write outside the
//! staging directory (absolute paths, `..`, links, devices) fails the whole
//! extraction.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;
use tracing::debug;

use crate::error::UpdateError;

/// Name of the file list the publisher embeds in every archive.
pub const FILE_LIST: &str = "files.txt";

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Unpack a gzip tarball into `dest`, which must already exist.
///
/// On error `dest` may hold a partial tree; the caller discards it.
pub fn unpack(archive: &[u8], dest: &Path) -> Result<ExtractSummary, UpdateError> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut summary = ExtractSummary::default();

    let entries = tar.entries().map_err(extraction)?;
    for entry in entries {
        let mut entry = entry.map_err(extraction)?;
        let raw_path = entry.path().map_err(extraction)?.into_owned();
        let entry_type = entry.header().entry_type();

        if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }

        let Some(relative) = sanitize(&raw_path) else {
            return Err(UpdateError::Extraction(format!(
                "unsafe path in archive: {}",
                raw_path.display()
            )));
        };
        let target = dest.join(&relative);

        match entry_type {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(extraction)?;
                summary.files += 1;
                summary.bytes += entry.header().size().unwrap_or(0);
                debug!(path = ?relative, "extracted");
            }
            other => {
                return Err(UpdateError::Extraction(format!(
                    "unsupported entry type {other:?} for {}",
                    raw_path.display()
                )));
            }
        }
    }

    if summary.files == 0 {
        return Err(UpdateError::Extraction("archive contains no files".to_string()));
    }

    check_file_list(dest)?;
    Ok(summary)
}

/// Every path named in the embedded file list must have been extracted.
fn check_file_list(dest: &Path) -> Result<(), UpdateError> {
    let list_path = dest.join(FILE_LIST);
    let mut list = String::new();
    match std::fs::File::open(&list_path) {
        Ok(mut f) => {
            f.read_to_string(&mut list)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    for line in list.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let listed = sanitize(Path::new(line))
            .ok_or_else(|| UpdateError::Extraction(format!("unsafe path in {FILE_LIST}: {line}")))?;
        if !dest.join(&listed).is_file() {
            return Err(UpdateError::Extraction(format!(
                "{line} is listed in {FILE_LIST} but missing from the archive"
            )));
        }
    }
    Ok(())
}

/// Strip `.` components; reject anything that is not a plain relative path.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn extraction(e: std::io::Error) -> UpdateError {
    UpdateError::Extraction(e.to_string())
}
