use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{DownloadRecord, ItemId, RecordStatus};
use crate::domain::ports::record_store::RecordStore;

/// ``RecordStore`` kept as one pretty printed JSON array on disk.
///
/// Every mutation rewrites the whole file through a temporary sibling and a rename,
/// so a crash mid-write leaves the previous version intact.
pub struct JsonRecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<DownloadRecord>, DomainError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(vec![]),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(err) => Err(DomainError::Storage(format!("Can't read {}: {err}", self.path.display()))),
        }
    }

    async fn write(&self, records: &[DownloadRecord]) -> Result<(), DomainError> {
        let io_err = |err: std::io::Error| DomainError::Storage(format!("Can't write {}: {err}", self.path.display()));
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(records)?).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        debug!(records = records.len(), "Saved download records.");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn load_all(&self) -> Result<Vec<DownloadRecord>, DomainError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    #[instrument(name = "record_upsert", skip_all, fields(item = record.item_id(), file = %record.file_id()))]
    async fn upsert(&self, record: DownloadRecord) -> Result<(), DomainError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        match records.iter_mut().find(|r| r.same_file(*record.item_id(), record.file_id())) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.write(&records).await
    }

    async fn set_status(&self, item_id: ItemId, file_id: &str, status: RecordStatus) -> Result<bool, DomainError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let Some(record) = records.iter_mut().find(|r| r.same_file(item_id, file_id)) else {
            warn!(item_id, file_id, "No download record to update.");
            return Ok(false);
        };
        record.set_status(status);
        self.write(&records).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FileSpec;
    use url::Url;

    fn spec(id: &str) -> FileSpec {
        FileSpec::new(id, format!("{id}.exe"), Url::parse(&format!("https://cdn.example.com/{id}.exe")).unwrap())
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonRecordStore::new(dir.path().join("state/records.json"));
        assert!(store.load_all().await?.is_empty());
        assert!(!store.set_status(1, "a", RecordStatus::Failed).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonRecordStore::new(dir.path().join("state/records.json"));
        store.upsert(DownloadRecord::new(1, Some("Game".into()), &spec("a"), RecordStatus::Downloading)).await?;
        store.upsert(DownloadRecord::new(1, Some("Game".into()), &spec("b"), RecordStatus::Downloading)).await?;
        store.upsert(DownloadRecord::new(1, Some("Game".into()), &spec("a"), RecordStatus::Downloaded)).await?;

        let reopened = JsonRecordStore::new(store.path().to_path_buf());
        let records = reopened.load_all().await?;
        assert_eq!(records.len(), 2);
        assert_eq!(*records[0].status(), RecordStatus::Downloaded);
        assert_eq!(records[1].file_spec(), spec("b"));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_status() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonRecordStore::new(dir.path().join("records.json"));
        store.upsert(DownloadRecord::new(3, None, &spec("a"), RecordStatus::Downloading)).await?;
        assert!(store.set_status(3, "a", RecordStatus::NotDownloaded).await?);
        assert_eq!(*store.load_all().await?[0].status(), RecordStatus::NotDownloaded);
        Ok(())
    }
}
