use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{DownloadItem, DownloadJob, DownloadRecord, FileSpec, ItemId, RecordStatus};
use crate::domain::ports::record_store::RecordStore;
use crate::domain::services::batch::{BatchDownloader, BatchOutcome};
use crate::domain::services::download::FileDownloader;
use crate::domain::services::resume::discard_partials;

struct ActiveJob {
    token: CancellationToken,
    /// Set by an explicit user cancel, partial data is deleted once the job stops.
    purge: Arc<AtomicBool>,
}

///# ``DownloadService``
/// Runs item batches on a bounded pool and keeps their download records current.
///
/// At most ``max_concurrent_jobs`` items download at once, further submissions wait
/// for a free slot. An item can only be active once.
pub struct DownloadService {
    batch: BatchDownloader,
    records: Arc<dyn RecordStore>,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<ItemId, ActiveJob>>>,
    tasks: Mutex<JoinSet<(ItemId, BatchOutcome)>>,
}

impl DownloadService {
    pub fn new(engine: FileDownloader, records: Arc<dyn RecordStore>) -> Self {
        let max_jobs = (*engine.config().max_concurrent_jobs()).max(1);
        Self {
            batch: BatchDownloader::new(engine).with_records(records.clone()),
            records,
            permits: Arc::new(Semaphore::new(max_jobs)),
            active: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queue ``item`` for download.
    #[instrument(name = "submit_item", skip_all, fields(item = item.item_id(), files = item.files().len()))]
    pub async fn submit(&self, item: DownloadItem) -> Result<(), DomainError> {
        let item_id = *item.item_id();
        let token = CancellationToken::new();
        let purge = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.active.lock().await;
            if active.contains_key(&item_id) {
                return Err(DomainError::AlreadyActive(item_id));
            }
            active.insert(item_id, ActiveJob { token: token.clone(), purge: purge.clone() });
        }

        for file in item.files() {
            let record = DownloadRecord::new(item_id, item.title().clone(), file, RecordStatus::Downloading);
            if let Err(err) = self.records.upsert(record).await {
                warn!(error = %err, "Can't record queued download.");
            }
        }

        let batch = self.batch.clone();
        let records = self.records.clone();
        let permits = self.permits.clone();
        let active = self.active.clone();
        self.tasks.lock().await.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => BatchOutcome::Cancelled { file_index: 0 },
                permit = permits.acquire_owned() => match permit {
                    Ok(_permit) => {
                        debug!(item_id, "Acquired download slot.");
                        batch.run(&item, &token).await
                    }
                    Err(err) => BatchOutcome::Failed { file_index: 0, cause: err.to_string() },
                },
            };
            settle(&batch, records.as_ref(), &item, &outcome, purge.load(Ordering::SeqCst)).await;
            active.lock().await.remove(&item_id);
            (item_id, outcome)
        });
        info!("Queued item for download.");
        Ok(())
    }

    /// Explicit user cancel: stop the item and delete its partial data.
    /// Returns ``false`` if the item isn't active.
    pub async fn cancel(&self, item_id: ItemId) -> bool {
        match self.active.lock().await.get(&item_id) {
            Some(job) => {
                info!(item_id, "Cancelling download.");
                job.purge.store(true, Ordering::SeqCst);
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every item but keep partial data so the next start can resume.
    pub async fn shutdown(&self) {
        let active = self.active.lock().await;
        info!(items = active.len(), "Shutting down, partial downloads are kept.");
        for job in active.values() {
            job.token.cancel();
        }
    }

    pub async fn is_active(&self, item_id: ItemId) -> bool {
        self.active.lock().await.contains_key(&item_id)
    }

    /// Wait for every queued item to reach a terminal state.
    pub async fn join_all(&self) -> Result<Vec<(ItemId, BatchOutcome)>> {
        let mut tasks = self.tasks.lock().await;
        let mut outcomes = vec![];
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.context("Download task panicked")?);
        }
        Ok(outcomes)
    }

    /// Resubmit every file whose record says a download was in flight when the process stopped.
    #[instrument(name = "resume_pending", skip_all)]
    pub async fn resume_pending(&self) -> Result<usize> {
        let records = self.records.load_all().await.context("Can't load download records")?;
        let mut items: Vec<(ItemId, Option<String>, Vec<FileSpec>)> = vec![];
        for record in records.iter().filter(|r| *r.status() == RecordStatus::Downloading) {
            match items.iter_mut().find(|(id, _, _)| id == record.item_id()) {
                Some((_, _, files)) => files.push(record.file_spec()),
                None => items.push((*record.item_id(), record.item_title().clone(), vec![record.file_spec()])),
            }
        }

        let mut submitted = 0;
        for (item_id, title, files) in items {
            match self.submit(DownloadItem::new(item_id, title, files)).await {
                Ok(()) => submitted += 1,
                Err(DomainError::AlreadyActive(_)) => debug!(item_id, "Interrupted item already running."),
                Err(err) => return Err(err).context("Can't resume interrupted download"),
            }
        }
        info!(items = submitted, "Resumed interrupted downloads.");
        Ok(submitted)
    }
}

/// Bring records and storage in line with how the batch ended.
async fn settle(
    batch: &BatchDownloader,
    records: &dyn RecordStore,
    item: &DownloadItem,
    outcome: &BatchOutcome,
    purge: bool,
) {
    let item_id = *item.item_id();
    let untouched_from = match outcome {
        BatchOutcome::Completed { .. } => return,
        BatchOutcome::Failed { file_index, cause } => {
            error!(item_id, file_index, %cause, "Item download failed.");
            file_index + 1
        }
        BatchOutcome::Cancelled { file_index } if purge => {
            if let Some(file) = item.files().get(*file_index) {
                let job = DownloadJob::new(item, file.clone());
                let storage = batch.engine().storage().as_ref();
                let chunk_count = *batch.engine().config().chunk_count();
                if let Err(err) = discard_partials(storage, &job, chunk_count, true).await {
                    warn!(error = %err, "Can't delete partial download.");
                }
            }
            *file_index
        }
        // Shutdown keeps records in Downloading so the next start resumes them.
        BatchOutcome::Cancelled { .. } => return,
    };
    for file in item.files().iter().skip(untouched_from) {
        if let Err(err) = records.set_status(item_id, file.file_id(), RecordStatus::NotDownloaded).await {
            warn!(error = %err, "Can't reset download record.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DownloadEvent;
    use crate::domain::ports::download_service::RangeTransport;
    use crate::domain::ports::progress_tracker::EventSink;
    use crate::domain::ports::storage_service::StorageBackend;
    use crate::infra::config::EngineConfig;
    use crate::infra::storage::fs_adapter::OpendalStorage;
    use crate::utils::testing::{MemoryRecordStore, MemoryTransport, UrlRouter, patterned_bytes, temp_storage};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use url::Url;

    fn url(name: &str) -> String {
        format!("https://cdn.example.com/{name}")
    }

    fn item(item_id: ItemId, name: &str) -> DownloadItem {
        let file = FileSpec::new(name, name, Url::parse(&url(name)).unwrap());
        DownloadItem::new(item_id, None, vec![file])
    }

    fn service(
        transport: Arc<dyn RangeTransport>,
        storage: &OpendalStorage,
        max_jobs: usize,
    ) -> (DownloadService, Arc<MemoryRecordStore>, UnboundedReceiver<DownloadEvent>) {
        let config = EngineConfig::default()
            .with_max_concurrent_jobs(max_jobs)
            .with_chunk_threshold(1000)
            .with_buffer_size(256)
            .with_progress_interval(Duration::from_millis(10));
        let (sink, rx) = EventSink::channel();
        let engine = FileDownloader::new(transport, Arc::new(storage.clone()), config, sink);
        let records = Arc::new(MemoryRecordStore::default());
        (DownloadService::new(engine, records.clone()), records, rx)
    }

    /// Drain events until every listed item reported at least ``bytes``.
    async fn wait_for_progress(rx: &mut UnboundedReceiver<DownloadEvent>, items: &[ItemId], bytes: u64) {
        let mut pending: Vec<ItemId> = items.to_vec();
        while !pending.is_empty() {
            match rx.recv().await {
                Some(DownloadEvent::Progress(progress)) if progress.downloaded_bytes >= bytes => {
                    pending.retain(|id| *id != progress.item_id);
                }
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_duplicate_item_rejected() -> anyhow::Result<()> {
        let (_dir, storage) = temp_storage();
        let transport = Arc::new(MemoryTransport::new(patterned_bytes(4000)).stall_at(100));
        let (service, _, _rx) = service(transport, &storage, 3);

        service.submit(item(1, "a.exe")).await?;
        assert!(service.is_active(1).await);
        assert!(matches!(service.submit(item(1, "a.exe")).await, Err(DomainError::AlreadyActive(1))));
        service.shutdown().await;
        service.join_all().await?;
        assert!(!service.is_active(1).await);
        assert!(!service.cancel(1).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_items() -> anyhow::Result<()> {
        let (_dir, storage) = temp_storage();
        let router = Arc::new(
            UrlRouter::new()
                .route(&url("a.exe"), MemoryTransport::new(patterned_bytes(400)).stall_at(200))
                .route(&url("b.exe"), MemoryTransport::new(patterned_bytes(400))),
        );
        let (service, _, mut rx) = service(router, &storage, 1);

        service.submit(item(1, "a.exe")).await?;
        wait_for_progress(&mut rx, &[1], 200).await;
        service.submit(item(2, "b.exe")).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.item_id(), 1, "second item started while the pool was full");
        }

        assert!(service.cancel(1).await);
        let outcomes = service.join_all().await?;
        assert!(outcomes.contains(&(1, BatchOutcome::Cancelled { file_index: 0 })));
        assert!(outcomes.contains(&(2, BatchOutcome::Completed { outputs: vec!["item_2/b.exe".into()] })));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_purges_and_shutdown_retains() -> anyhow::Result<()> {
        let (_dir, storage) = temp_storage();
        let stalling = || MemoryTransport::new(patterned_bytes(8000)).piece_size(100).stall_at(1500);
        let router = Arc::new(UrlRouter::new().route(&url("a.exe"), stalling()).route(&url("b.exe"), stalling()));
        let (service, records, mut rx) = service(router, &storage, 3);

        service.submit(item(1, "a.exe")).await?;
        service.submit(item(2, "b.exe")).await?;
        // Chunks 1 to 3 finish, chunk 0 stalls at 1500.
        wait_for_progress(&mut rx, &[1, 2], 7500).await;

        assert!(service.cancel(1).await);
        service.shutdown().await;
        let outcomes = service.join_all().await?;
        assert_eq!(outcomes.len(), 2);

        assert!(storage.find("item_1/a.exe.part0").await?.is_none());
        assert!(storage.find("item_1/a.exe.part3").await?.is_none());
        assert!(storage.find("item_1/a.exe.manifest").await?.is_none());
        assert_eq!(storage.length_of("item_2/b.exe.part0").await?, Some(1500));
        assert_eq!(storage.length_of("item_2/b.exe.part3").await?, Some(2000));
        assert!(storage.find("item_2/b.exe.manifest").await?.is_some());

        let records = records.load_all().await?;
        let status = |id: ItemId| records.iter().find(|r| *r.item_id() == id).map(|r| *r.status());
        assert_eq!(status(1), Some(RecordStatus::NotDownloaded));
        assert_eq!(status(2), Some(RecordStatus::Downloading));
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_pending_finishes_interrupted_items() -> anyhow::Result<()> {
        let (_dir, storage) = temp_storage();
        let transport = Arc::new(MemoryTransport::new(patterned_bytes(4000)));
        let (service, records, _rx) = service(transport, &storage, 3);

        let interrupted = item(4, "setup.exe");
        let file = &interrupted.files()[0];
        records.upsert(DownloadRecord::new(4, None, file, RecordStatus::Downloading)).await?;
        records.upsert(DownloadRecord::new(5, None, file, RecordStatus::Downloaded)).await?;

        assert_eq!(service.resume_pending().await?, 1);
        let outcomes = service.join_all().await?;
        assert_eq!(outcomes, vec![(4, BatchOutcome::Completed { outputs: vec!["item_4/setup.exe".into()] })]);
        let statuses: Vec<RecordStatus> = records.load_all().await?.iter().map(|r| *r.status()).collect();
        assert_eq!(statuses, vec![RecordStatus::Downloaded, RecordStatus::Downloaded]);
        assert_eq!(storage.length_of("item_4/setup.exe").await?, Some(4000));
        Ok(())
    }
}
