use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use log::{debug, error, info};
use uuid::Uuid;

/// Filesystem-backed snapshot slot.
///
/// Saves go through a staging file next to the target which is then renamed over it, so a
/// reader sees either the old snapshot or the new one in full.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create snapshot dir {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        info!("FileStorage initialized at {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Same directory as the target so the rename never crosses filesystems
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("snapshot"));
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    fn write_staged(staging: &Path, data: &[u8]) -> io::Result<()> {
        let mut f = File::create(staging)?;
        f.write_all(data)?;
        f.sync_all()
    }
}

impl Storage for FileStorage {
    fn save_snapshot(&self, data: &[u8]) -> Result<(), StorageError> {
        let staging = self.staging_path();

        if let Err(e) = Self::write_staged(&staging, data) {
            error!("Failed to write staging file {}: {}", staging.display(), e);
            let _ = fs::remove_file(&staging);
            return Err(StorageError::WriteFailed);
        }

        fs::rename(&staging, &self.path).map_err(|e| {
            error!(
                "Failed to move {} into place at {}: {}",
                staging.display(),
                self.path.display(),
                e
            );
            let _ = fs::remove_file(&staging);
            StorageError::WriteFailed
        })?;

        debug!("Wrote {} byte(s) to {}", data.len(), self.path.display());
        Ok(())
    }

    fn get_snapshot(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(buf) => {
                debug!("Read {} byte(s) from {}", buf.len(), self.path.display());
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Read failed {}: {}", self.path.display(), e);
                Err(StorageError::ReadFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftover_staging_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn test_absent_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("received-data.json")).unwrap();
        assert_eq!(storage.get_snapshot().unwrap(), None);
    }

    #[test]
    fn test_creates_missing_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("snap.json");
        let storage = FileStorage::new(&path).unwrap();

        storage.save_snapshot(b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_binary_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("snap.bin")).unwrap();
        let payload: Vec<u8> = (0u8..=255).chain([0xff, 0x00, 0xfe]).collect();

        storage.save_snapshot(&payload).unwrap();
        assert_eq!(storage.get_snapshot().unwrap(), Some(payload));
    }

    #[test]
    fn test_empty_snapshot_is_some_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("snap.json")).unwrap();

        storage.save_snapshot(b"").unwrap();
        assert_eq!(storage.get_snapshot().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("snap.json")).unwrap();

        storage.save_snapshot(b"a much longer first payload").unwrap();
        storage.save_snapshot(b"short").unwrap();

        assert_eq!(storage.get_snapshot().unwrap(), Some(b"short".to_vec()));
        assert_eq!(leftover_staging_files(dir.path()), 0);
    }

    #[test]
    fn test_failed_save_cleans_up_staging_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("snap.json");
        // A non-empty directory in place of the target makes the final rename fail
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();
        let storage = FileStorage::new(&target).unwrap();

        assert_eq!(storage.save_snapshot(b"new"), Err(StorageError::WriteFailed));
        assert_eq!(leftover_staging_files(dir.path()), 0);
        assert_eq!(fs::read(target.join("keep")).unwrap(), b"x");
    }

    #[test]
    fn test_unreadable_target_is_read_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("snap.json");
        fs::create_dir(&target).unwrap();
        let storage = FileStorage::new(&target).unwrap();

        assert_eq!(storage.get_snapshot(), Err(StorageError::ReadFailed));
    }

    #[test]
    fn test_snapshot_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");

        FileStorage::new(&path).unwrap().save_snapshot(b"persisted").unwrap();
        let reopened = FileStorage::new(&path).unwrap();

        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(reopened.get_snapshot().unwrap(), Some(b"persisted".to_vec()));
    }
}
