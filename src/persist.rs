use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::types::CameraRecord;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// JSON file holding the registry's `list()` snapshot
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    // One writer at a time, so a stale snapshot never overwrites a newer one.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty fleet, not an error.
    pub async fn load(&self) -> Result<Vec<CameraRecord>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // First start, before any camera was saved
                warn!("Snapshot file {} not found, starting with an empty registry", self.path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load the snapshot for startup. An unparseable file is renamed to
    /// `<name>.corrupt` so later saves cannot overwrite it, and the fleet
    /// starts empty. Read errors other than a missing file are returned.
    pub async fn load_or_quarantine(&self) -> Result<Vec<CameraRecord>, PersistError> {
        match self.load().await {
            Err(PersistError::Format(e)) => {
                let aside = self.quarantine_path();
                tokio::fs::rename(&self.path, &aside).await?;
                warn!(
                    "Snapshot {} is unreadable ({}), moved to {}",
                    self.path.display(),
                    e,
                    aside.display()
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }

    fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    /// Write the snapshot produced by `snapshot` while holding the write
    /// lock, replacing the file atomically.
    pub async fn save_with<F, Fut>(&self, snapshot: F) -> Result<usize, PersistError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Vec<CameraRecord>>,
    {
        let _guard = self.write_lock.lock().await;
        let records = snapshot().await;
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        info!("💾 Wrote {} cameras to {}", records.len(), self.path.display());
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::main_entrance;
    use crate::registry::Registry;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cctv-fleet-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let store = SnapshotStore::new(temp_path("missing"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let path = temp_path("restart");
        let registry = Registry::new();
        let first = registry.create(main_entrance()).await.unwrap();
        registry.set_liveness(first.id, true).await;
        registry.create(main_entrance()).await.unwrap();

        let store = SnapshotStore::new(&path);
        let written = store.save_with(|| registry.list()).await.unwrap();
        assert_eq!(written, 2);

        let restored = Registry::new();
        let loaded = SnapshotStore::new(&path).load().await.unwrap();
        restored.restore(loaded).await;
        assert_eq!(restored.list().await, registry.list().await);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = SnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, PersistError::Format(_)));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_kept_aside_before_next_save() {
        let path = temp_path("quarantine");
        let truncated = br#"[{"id": 1, "name": "Lobby Ut"#;
        std::fs::write(&path, truncated).unwrap();

        let store = SnapshotStore::new(&path);
        assert!(store.load_or_quarantine().await.unwrap().is_empty());

        let aside = store.quarantine_path();
        assert_eq!(std::fs::read(&aside).unwrap(), truncated.to_vec());
        assert!(!path.exists());

        let registry = Registry::new();
        registry.create(main_entrance()).await.unwrap();
        store.save_with(|| registry.list()).await.unwrap();

        assert_eq!(std::fs::read(&aside).unwrap(), truncated.to_vec());
        assert_eq!(store.load().await.unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&aside);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_fails_startup_load() {
        // A directory at the snapshot path cannot be read as a file
        let path = temp_path("is-a-dir");
        std::fs::create_dir_all(&path).unwrap();

        let err = SnapshotStore::new(&path).load_or_quarantine().await.unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
        assert!(path.is_dir());

        let _ = std::fs::remove_dir(&path);
    }
}
