use chrono::{DateTime, Local};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use url::Url;

use super::job::{FileSpec, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    NotDownloaded,
    Downloading,
    Downloaded,
    Failed,
}

/// Persisted state of one file download, used to pick up interrupted work after a restart.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
pub struct DownloadRecord {
    item_id: ItemId,
    item_title: Option<String>,
    file_id: String,
    file_name: String,
    url: Url,
    status: RecordStatus,
    updated_at: DateTime<Local>,
}

impl DownloadRecord {
    pub fn new(item_id: ItemId, item_title: Option<String>, file: &FileSpec, status: RecordStatus) -> Self {
        Self {
            item_id,
            item_title,
            file_id: file.file_id().clone(),
            file_name: file.file_name().clone(),
            url: file.url().clone(),
            status,
            updated_at: Local::now(),
        }
    }

    pub fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
        self.updated_at = Local::now();
    }

    pub fn file_spec(&self) -> FileSpec {
        FileSpec::new(self.file_id.clone(), self.file_name.clone(), self.url.clone())
    }

    /// ``true`` when both records describe the same file of the same item.
    pub fn same_file(&self, item_id: ItemId, file_id: &str) -> bool {
        self.item_id == item_id && self.file_id == file_id
    }
}
