use async_trait::async_trait;

use crate::domain::errors::DomainError;
use crate::domain::models::{DownloadRecord, ItemId, RecordStatus};

/// Persistence of download records, owned by the local cache layer.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<DownloadRecord>, DomainError>;

    /// Insert ``record``, replacing a record for the same item and file.
    async fn upsert(&self, record: DownloadRecord) -> Result<(), DomainError>;

    /// Returns ``false`` if no such record exists.
    async fn set_status(&self, item_id: ItemId, file_id: &str, status: RecordStatus) -> Result<bool, DomainError>;
}
