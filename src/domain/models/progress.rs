use tokio::time::Instant;

use super::job::ItemId;

/// Total bytes stored across all chunks of a job at one instant.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub at: Instant,
}

impl ProgressSnapshot {
    pub fn new(bytes: u64, at: Instant) -> Self {
        Self { bytes, at }
    }
}

/// Information about overall download progress of the file being fetched.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub item_id: ItemId,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Zero based position of the file in its batch.
    pub file_index: usize,
    pub total_files: usize,
    /// Bytes per second.
    pub speed: f64,
    pub eta_secs: Option<u64>,
}

impl ProgressEvent {
    /// Calculate progress percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        match self.total_bytes {
            Some(total) if total > 0 => (self.downloaded_bytes as f64 / total as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Everything the engine reports to whoever renders progress.
#[derive(Clone, Debug, PartialEq)]
pub enum DownloadEvent {
    Progress(ProgressEvent),
    FileCompleted {
        item_id: ItemId,
        file_index: usize,
        output: String,
        bytes: u64,
    },
    BatchCompleted {
        item_id: ItemId,
        outputs: Vec<String>,
    },
    Failed {
        item_id: ItemId,
        file_index: usize,
        cause: String,
    },
    Cancelled {
        item_id: ItemId,
        file_index: usize,
    },
}

impl DownloadEvent {
    pub fn item_id(&self) -> ItemId {
        match self {
            DownloadEvent::Progress(progress) => progress.item_id,
            DownloadEvent::FileCompleted { item_id, .. }
            | DownloadEvent::BatchCompleted { item_id, .. }
            | DownloadEvent::Failed { item_id, .. }
            | DownloadEvent::Cancelled { item_id, .. } => *item_id,
        }
    }
}
