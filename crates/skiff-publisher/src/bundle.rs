//! Release enumeration and archiving.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::PublishError;

/// Name of the embedded file list.
pub const FILE_LIST: &str = "files.txt";

/// Relative, `/`-separated paths of every regular file under `dir`, sorted.
///
/// A `files.txt` at the top of the release is skipped; the bundle carries a
/// freshly generated one. Symbolic links are refused since clients will not
/// extract them.
pub fn enumerate_release(dir: &Path) -> Result<Vec<String>, PublishError> {
    if !dir.is_dir() {
        return Err(PublishError::InvalidRelease(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            return Err(PublishError::InvalidRelease(format!(
                "symbolic link {} cannot be published",
                entry.path().display()
            )));
        }
        if !file_type.is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| PublishError::InvalidRelease(e.to_string()))?;
        let parts: Option<Vec<&str>> = relative.iter().map(|p| p.to_str()).collect();
        let Some(parts) = parts else {
            return Err(PublishError::InvalidRelease(format!(
                "non UTF-8 file name {}",
                relative.display()
            )));
        };
        let name = parts.join("/");
        if name == FILE_LIST {
            continue;
        }
        files.push(name);
    }

    if files.is_empty() {
        return Err(PublishError::InvalidRelease(format!(
            "{} contains no files",
            dir.display()
        )));
    }
    files.sort();
    Ok(files)
}

/// Build a gzip tarball of `files` (relative to `dir`) plus `files.txt`.
///
/// Headers carry no timestamps or ownership, so the same tree produces the
/// same archive.
pub fn bundle(dir: &Path, files: &[String]) -> Result<Vec<u8>, PublishError> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::best()));

    let mut list = files.join("\n");
    list.push('\n');
    append(&mut builder, FILE_LIST, list.as_bytes(), 0o644)?;

    for name in files {
        let path = dir.join(name);
        let data = std::fs::read(&path)?;
        append(&mut builder, name, &data, file_mode(&path)?)?;
        debug!(file = %name, bytes = data.len(), "bundled");
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn append<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
    mode: u32,
) -> Result<(), PublishError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, name, data)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(if mode & 0o111 != 0 { 0o755 } else { 0o644 })
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> std::io::Result<u32> {
    Ok(0o644)
}
