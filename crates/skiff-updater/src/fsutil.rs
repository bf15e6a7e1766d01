//! Durable file replacement.
//!
//! Every persisted record goes through [`write_atomic`]: the bytes land in a
//! temporary file in the destination directory, are fsynced, and the file is
//! renamed over the target. Readers observe either the old or the new
//! content.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `data`.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    sync_dir(parent)
}

/// Rename `from` to `to` and make the rename durable.
pub fn rename_durable(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to)?;
    sync_dir(parent_dir(to))
}

/// Flush directory metadata so renames survive a crash.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

/// Directories cannot be opened for syncing on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Remove a file or directory tree, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("version.txt");

        write_atomic(&path, b"1.0.0").unwrap();
        write_atomic(&path, b"1.0.1").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1.0.1");
        // Only the target remains; no temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("encryption_key.bin");

        write_atomic(&path, &[7u8; 32]).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a");
        let tree = dir.path().join("b");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(tree.join("c")).unwrap();

        remove_if_exists(&file).unwrap();
        remove_if_exists(&tree).unwrap();
        remove_if_exists(&dir.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!tree.exists());
    }
}
