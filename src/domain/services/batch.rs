use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::models::{DownloadEvent, DownloadItem, DownloadJob, DownloadRecord, RecordStatus};
use crate::domain::ports::record_store::RecordStore;
use crate::domain::services::download::{BatchPosition, FileDownloader, FileOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every file is on disk, outputs in batch order.
    Completed { outputs: Vec<String> },
    /// File ``file_index`` failed, earlier files stay on disk.
    Failed { file_index: usize, cause: String },
    /// Stopped while file ``file_index`` was in flight or about to start.
    Cancelled { file_index: usize },
}

/// Downloads the files of one item strictly one after the other.
#[derive(Clone)]
pub struct BatchDownloader {
    engine: FileDownloader,
    records: Option<Arc<dyn RecordStore>>,
}

impl BatchDownloader {
    pub fn new(engine: FileDownloader) -> Self {
        Self { engine, records: None }
    }

    /// Keep download records up to date while the batch runs.
    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn engine(&self) -> &FileDownloader {
        &self.engine
    }

    #[instrument(name = "download_batch", skip_all, fields(item = item.item_id(), files = item.files().len()))]
    pub async fn run(&self, item: &DownloadItem, token: &CancellationToken) -> BatchOutcome {
        let item_id = *item.item_id();
        let total_files = item.files().len();
        let sink = self.engine.sink();
        let mut outputs = Vec::with_capacity(total_files);

        for (file_index, file) in item.files().iter().enumerate() {
            if token.is_cancelled() {
                sink.emit(DownloadEvent::Cancelled { item_id, file_index });
                return BatchOutcome::Cancelled { file_index };
            }
            self.record(item, file_index, RecordStatus::Downloading).await;

            let mut job = DownloadJob::new(item, file.clone());
            let position = BatchPosition { file_index, total_files };
            match self.engine.download(&mut job, position, token).await {
                Ok(FileOutcome::Completed { bytes }) => {
                    self.record(item, file_index, RecordStatus::Downloaded).await;
                    sink.emit(DownloadEvent::FileCompleted {
                        item_id,
                        file_index,
                        output: job.output().clone(),
                        bytes,
                    });
                    outputs.push(job.output().clone());
                }
                Ok(FileOutcome::Cancelled) => {
                    sink.emit(DownloadEvent::Cancelled { item_id, file_index });
                    return BatchOutcome::Cancelled { file_index };
                }
                Err(err) => {
                    self.record(item, file_index, RecordStatus::Failed).await;
                    let cause = err.to_string();
                    sink.emit(DownloadEvent::Failed { item_id, file_index, cause: cause.clone() });
                    return BatchOutcome::Failed { file_index, cause };
                }
            }
        }

        info!(files = outputs.len(), "Batch completed.");
        sink.emit(DownloadEvent::BatchCompleted { item_id, outputs: outputs.clone() });
        BatchOutcome::Completed { outputs }
    }

    /// Record bookkeeping never fails a download, errors are only logged.
    async fn record(&self, item: &DownloadItem, file_index: usize, status: RecordStatus) {
        let Some(records) = &self.records else {
            return;
        };
        let file = &item.files()[file_index];
        let record = DownloadRecord::new(*item.item_id(), item.title().clone(), file, status);
        if let Err(err) = records.upsert(record).await {
            warn!(error = %err, file = %file.file_name(), "Can't update download record.");
        }
    }
}
