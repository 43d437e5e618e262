//! # Resume
//!
//! Reconciles what a previous attempt left in storage with a freshly computed plan.
//! Every attempt writes a small JSON manifest next to the output recording the size
//! and strategy it planned with, a restart compares it with the new metadata.

use bytes::Bytes;
use chrono::{DateTime, Local};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{ChunkDescriptor, ChunkPlan, DownloadJob, Strategy};
use crate::domain::ports::storage_service::StorageBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub total_size: Option<u64>,
    pub chunk_count: usize,
    pub strategy: Strategy,
    pub created_at: DateTime<Local>,
}

impl Manifest {
    pub fn for_plan(plan: &ChunkPlan) -> Self {
        Self {
            total_size: *plan.total_size(),
            chunk_count: plan.chunk_count(),
            strategy: *plan.strategy(),
            created_at: Local::now(),
        }
    }

    fn matches(&self, plan: &ChunkPlan) -> bool {
        self.total_size.is_some() && self.total_size == *plan.total_size() && self.strategy == *plan.strategy()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    /// The output already holds the whole file, nothing to transfer.
    AlreadyComplete { bytes: u64 },
    /// Chunks to run, each carrying the length its container already holds.
    Ready { chunks: Vec<ChunkDescriptor>, resumed_bytes: u64 },
}

pub struct ResumeCoordinator<'a> {
    storage: &'a dyn StorageBackend,
}

impl<'a> ResumeCoordinator<'a> {
    pub fn new(storage: &'a dyn StorageBackend) -> Self {
        Self { storage }
    }

    /// Decide where each chunk of ``plan`` starts, discarding stale state first.
    ///
    /// Existing containers are reused only when the previous attempt planned the same
    /// size and strategy. A size change drops every partial container of the job.
    #[instrument(name = "resume_prepare", skip_all, fields(output = %job.output()))]
    pub async fn prepare(&self, job: &DownloadJob, plan: &ChunkPlan) -> Result<ResumeState, DomainError> {
        let manifest = self.load_manifest(job).await?;
        let total_size = *plan.total_size();

        let output_len = self.storage.length_of(job.output()).await?;
        if manifest.is_none() {
            // Nothing half-finished is on record, a full-size output is a finished download.
            if let (Some(total), Some(len)) = (total_size, output_len) {
                if len == total && self.storage.find(&job.part_name(0)).await?.is_none() {
                    info!(bytes = len, "Output already complete.");
                    return Ok(ResumeState::AlreadyComplete { bytes: len });
                }
            }
        }

        let mut stale = match &manifest {
            Some(previous) if !previous.matches(plan) => {
                warn!(
                    previous_size = ?previous.total_size,
                    size = ?total_size,
                    previous_strategy = ?previous.strategy,
                    "Remote file changed since the last attempt, discarding partial data."
                );
                true
            }
            _ => false,
        };
        if manifest.is_none() && !plan.is_chunked() && output_len.is_some() {
            // Only an attempt with a manifest leaves a partial output, this one is a finished older version.
            warn!(previous_size = ?output_len, size = ?total_size, "Existing output doesn't match the remote file, downloading again.");
            stale = true;
        }
        if total_size.is_none() || (!plan.is_chunked() && !plan.supports_ranges()) {
            // Without a size or range support the bytes already stored can't be continued.
            stale = true;
        }

        let mut chunks = self.descriptors(job, plan).await?;
        if !stale && chunks.iter().any(|chunk| chunk.expected_len().is_some_and(|len| chunk.written > len)) {
            warn!("A partial container is larger than its range, discarding partial data.");
            stale = true;
        }

        if stale {
            let previous_count = manifest.as_ref().map_or(0, |m| m.chunk_count);
            discard_partials(self.storage, job, previous_count.max(plan.chunk_count()), true).await?;
            for chunk in &mut chunks {
                chunk.written = 0;
            }
        }

        self.save_manifest(job, &Manifest::for_plan(plan)).await?;
        let resumed_bytes = chunks.iter().map(|chunk| chunk.written).sum();
        if resumed_bytes > 0 {
            info!(resumed_bytes, "Resuming from partial data.");
        }
        Ok(ResumeState::Ready { chunks, resumed_bytes })
    }

    async fn descriptors(&self, job: &DownloadJob, plan: &ChunkPlan) -> Result<Vec<ChunkDescriptor>, DomainError> {
        if !plan.is_chunked() {
            let written = self.storage.length_of(job.output()).await?.unwrap_or_default();
            let range = plan.ranges().first().copied();
            return Ok(vec![ChunkDescriptor::new(0, range, job.output().clone(), written)]);
        }
        let mut chunks = Vec::with_capacity(plan.ranges().len());
        for (index, range) in plan.ranges().iter().enumerate() {
            let container = job.part_name(index);
            let written = self.storage.length_of(&container).await?.unwrap_or_default();
            chunks.push(ChunkDescriptor::new(index, Some(*range), container, written));
        }
        Ok(chunks)
    }

    pub async fn load_manifest(&self, job: &DownloadJob) -> Result<Option<Manifest>, DomainError> {
        let Some(handle) = self.storage.find(&job.manifest_name()).await? else {
            return Ok(None);
        };
        let stream = self.storage.open_read(&handle).await?;
        let raw: Vec<Bytes> = stream.try_collect().await?;
        match serde_json::from_slice::<Manifest>(&raw.concat()) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(err) => {
                warn!(error = %err, "Unreadable manifest, treating the attempt as unknown.");
                Ok(None)
            }
        }
    }

    async fn save_manifest(&self, job: &DownloadJob, manifest: &Manifest) -> Result<(), DomainError> {
        let handle = self.storage.find_or_create(&job.manifest_name()).await?;
        let mut writer = self.storage.open_truncate(&handle).await?;
        let written = writer.write(Bytes::from(serde_json::to_vec(manifest)?)).await;
        writer.close().await?;
        written
    }

    /// Forget the attempt record once the output is final.
    pub async fn finish(&self, job: &DownloadJob) -> Result<(), DomainError> {
        self.storage.delete_named(&job.manifest_name()).await?;
        Ok(())
    }
}

/// Delete the manifest and every part container of ``job``.
///
/// Parts ``0..min_parts`` are always looked up, further indices as long as they exist.
/// The output container is deleted too when ``include_output`` is set.
pub async fn discard_partials(
    storage: &dyn StorageBackend,
    job: &DownloadJob,
    min_parts: usize,
    include_output: bool,
) -> Result<usize, DomainError> {
    let mut deleted = 0;
    let mut index = 0;
    loop {
        let removed = storage.delete_named(&job.part_name(index)).await?;
        if !removed && index >= min_parts {
            break;
        }
        deleted += usize::from(removed);
        index += 1;
    }
    if storage.delete_named(&job.manifest_name()).await? {
        deleted += 1;
    }
    if include_output && storage.delete_named(job.output()).await? {
        deleted += 1;
    }
    debug!(output = %job.output(), deleted, "Discarded partial containers.");
    Ok(deleted)
}
