use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{ChunkDescriptor, ChunkPlan, DownloadJob, JobState};
use crate::domain::ports::download_service::{RemoteInfo, RangeTransport};
use crate::domain::ports::progress_tracker::EventSink;
use crate::domain::ports::storage_service::StorageBackend;
use crate::domain::services::chunk_worker::{ChunkOutcome, ChunkWorker};
use crate::domain::services::merge_parts::MergeParts;
use crate::domain::services::inspect::inspect_capabilities;
use crate::domain::services::progress::{ChunkProgress, ProgressAggregator, ProgressContext};
use crate::domain::services::resume::{ResumeCoordinator, ResumeState, discard_partials};
use crate::domain::services::split_parts::plan;
use crate::infra::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Completed { bytes: u64 },
    /// Stopped on request, partial containers are kept.
    Cancelled,
}

/// Position of a file inside its batch, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub file_index: usize,
    pub total_files: usize,
}

impl BatchPosition {
    pub fn single() -> Self {
        Self { file_index: 0, total_files: 1 }
    }
}

///# ``FileDownloader``
/// Downloads one file end to end: inspect, plan, resume, transfer and assembly.
#[derive(Clone)]
pub struct FileDownloader {
    transport: Arc<dyn RangeTransport>,
    storage: Arc<dyn StorageBackend>,
    config: EngineConfig,
    sink: EventSink,
}

impl FileDownloader {
    pub fn new(
        transport: Arc<dyn RangeTransport>,
        storage: Arc<dyn StorageBackend>,
        config: EngineConfig,
        sink: EventSink,
    ) -> Self {
        Self { transport, storage, config, sink }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Run ``job`` to a terminal state.
    ///
    /// Any chunk failure fails the job but leaves every container in place, so calling
    /// this again with the same job only transfers the missing bytes.
    #[instrument(name = "download_file", skip_all, fields(output = %job.output(), url = %job.file().url()))]
    pub async fn download(
        &self,
        job: &mut DownloadJob,
        position: BatchPosition,
        token: &CancellationToken,
    ) -> Result<FileOutcome, DomainError> {
        if token.is_cancelled() {
            job.transition(JobState::Cancelled);
            return Ok(FileOutcome::Cancelled);
        }
        job.transition(JobState::Planning);
        let remote = inspect_capabilities(self.transport.as_ref(), job.file().url()).await;
        let chunk_plan = plan(remote, *self.config.chunk_count(), *self.config.chunk_threshold());

        let result = match self.run_plan(job, chunk_plan.clone(), position, token).await {
            Err(DomainError::RangeNotHonoured(url)) => {
                warn!(%url, "Server ignored a byte range request, restarting as a single stream.");
                discard_partials(self.storage.as_ref(), job, chunk_plan.chunk_count(), true).await?;
                let fallback = plan(
                    RemoteInfo::new(*chunk_plan.total_size(), false),
                    *self.config.chunk_count(),
                    *self.config.chunk_threshold(),
                );
                self.run_plan(job, fallback, position, token).await
            }
            other => other,
        };

        match &result {
            Ok(FileOutcome::Completed { bytes }) => {
                info!(bytes, "Download completed.");
                job.transition(JobState::Completed);
            }
            Ok(FileOutcome::Cancelled) => {
                info!("Download cancelled, partial data kept.");
                job.transition(JobState::Cancelled);
            }
            Err(err) => {
                error!(error = %err, "Download failed.");
                job.transition(JobState::Failed);
            }
        }
        result
    }

    async fn run_plan(
        &self,
        job: &mut DownloadJob,
        chunk_plan: ChunkPlan,
        position: BatchPosition,
        token: &CancellationToken,
    ) -> Result<FileOutcome, DomainError> {
        job.set_plan(chunk_plan.clone());
        let coordinator = ResumeCoordinator::new(self.storage.as_ref());

        if *chunk_plan.total_size() == Some(0) {
            debug!("Remote file is empty.");
            self.storage.create(job.output()).await?;
            discard_partials(self.storage.as_ref(), job, 0, false).await?;
            return Ok(FileOutcome::Completed { bytes: 0 });
        }

        let chunks = match coordinator.prepare(job, &chunk_plan).await? {
            ResumeState::AlreadyComplete { bytes } => return Ok(FileOutcome::Completed { bytes }),
            ResumeState::Ready { chunks, .. } => chunks,
        };

        job.transition(JobState::Running);
        if !self.transfer(job, &chunk_plan, &chunks, position, token).await? {
            return Ok(FileOutcome::Cancelled);
        }

        if chunk_plan.is_chunked() {
            job.transition(JobState::Assembling);
            MergeParts::new(self.storage.as_ref(), job.output(), *self.config.copy_buffer())
                .merge(&chunks)
                .await?;
        }
        coordinator.finish(job).await?;
        let bytes = self.storage.length_of(job.output()).await?.unwrap_or_default();
        Ok(FileOutcome::Completed { bytes })
    }

    /// Run one worker per chunk plus the progress aggregator.
    /// Returns ``false`` when the transfer was cancelled.
    async fn transfer(
        &self,
        job: &DownloadJob,
        chunk_plan: &ChunkPlan,
        chunks: &[ChunkDescriptor],
        position: BatchPosition,
        token: &CancellationToken,
    ) -> Result<bool, DomainError> {
        let progress = ChunkProgress::new();
        for chunk in chunks {
            progress.set(chunk.index, chunk.written).await;
        }
        // Cancelling the job reaches the chunks, a failing chunk only stops its siblings.
        let chunk_token = token.child_token();
        let stop = CancellationToken::new();

        let aggregator = ProgressAggregator::new(
            progress.clone(),
            ProgressContext {
                item_id: *job.item_id(),
                file_index: position.file_index,
                total_files: position.total_files,
                total_bytes: *chunk_plan.total_size(),
            },
            self.sink.clone(),
            *self.config.progress_interval(),
        );
        let aggregator = tokio::spawn(aggregator.run(chunk_token.clone(), stop.clone()));

        let worker = ChunkWorker::new(
            self.transport.clone(),
            self.storage.clone(),
            job.file().url().clone(),
            progress,
            *self.config.buffer_size(),
        );
        let mut workers = JoinSet::new();
        for chunk in chunks.iter().cloned() {
            let ranged = chunk_plan.is_chunked() || (*chunk_plan.supports_ranges() && chunk.written > 0);
            let worker = worker.clone();
            let token = chunk_token.clone();
            workers.spawn(async move { (chunk.index, worker.run(chunk, ranged, token).await) });
        }

        let mut failure: Option<DomainError> = None;
        let mut cancelled = false;
        while let Some(joined) = workers.join_next().await {
            let err = match joined {
                Ok((_, Ok(ChunkOutcome::Completed { .. }))) => continue,
                Ok((_, Ok(ChunkOutcome::Cancelled))) => {
                    cancelled = true;
                    continue;
                }
                Ok((index, Err(err))) => {
                    error!(index, error = %err, "Chunk failed.");
                    err
                }
                Err(err) => err.into(),
            };
            if failure.is_none() {
                chunk_token.cancel();
                failure = Some(err);
            }
        }

        stop.cancel();
        if let Err(err) = aggregator.await {
            warn!(error = %err, "Progress aggregator ended abnormally.");
        }
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(!(cancelled || token.is_cancelled()))
    }
}
