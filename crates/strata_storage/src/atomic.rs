//! Temp-then-rename publication of files and directories.

use crate::error::StorageResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Writes `data` to `path` atomically.
///
/// The bytes go to `<path>.tmp` first, which is synced and then renamed over
/// `path`. With `sync`, the parent directory is fsynced as well so the rename
/// itself is durable.
///
/// # Errors
///
/// Returns an error if any step fails. On failure `path` is left untouched.
pub fn write_atomic(path: &Path, data: &[u8], sync: bool) -> StorageResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = Path::new(&temp);

    let mut file = File::create(temp)?;
    file.write_all(data)?;
    if sync {
        file.sync_all()?;
    }
    drop(file);

    if let Err(err) = fs::rename(temp, path) {
        let _ = fs::remove_file(temp);
        return Err(err.into());
    }
    if sync {
        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
    }
    Ok(())
}

/// Renames a fully written directory `from` to its final name `to`.
///
/// Any stale directory at `to` is removed first.
///
/// # Errors
///
/// Returns an error if the rename or the parent sync fails.
pub fn publish_dir(from: &Path, to: &Path) -> StorageResult<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)?;
    if let Some(parent) = to.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Fsyncs a directory so that entry creations and renames are durable.
///
/// Windows NTFS journals metadata, so this is a no-op there.
///
/// # Errors
///
/// Returns an error if the directory cannot be opened or synced.
#[cfg(unix)]
pub fn sync_dir(path: &Path) -> StorageResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

/// Fsyncs a directory so that entry creations and renames are durable.
///
/// Windows NTFS journals metadata, so this is a no-op there.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        write_atomic(&path, b"one", true).unwrap();
        write_atomic(&path, b"two", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("MANIFEST.tmp").exists());
    }

    #[test]
    fn publish_replaces_stale_dir() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("seg.tmp");
        let dst = dir.path().join("seg");
        fs::create_dir(&tmp).unwrap();
        fs::write(tmp.join("a"), b"new").unwrap();
        fs::create_dir(&dst).unwrap();
        fs::write(dst.join("a"), b"old").unwrap();

        publish_dir(&tmp, &dst).unwrap();
        assert!(!tmp.exists());
        assert_eq!(fs::read(dst.join("a")).unwrap(), b"new");
    }
}
