use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::domain::models::{DownloadEvent, ItemId, ProgressEvent, ProgressSnapshot};
use crate::domain::ports::progress_tracker::EventSink;
use crate::domain::services::speed::SpeedEstimator;

/// Cumulative bytes stored per chunk index, shared between a job's workers and its aggregator.
#[derive(Clone, Debug, Default)]
pub struct ChunkProgress {
    part_progress: Arc<RwLock<HashMap<usize, u64>>>,
}

impl ChunkProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that chunk ``index`` now holds ``bytes`` bytes in total.
    pub async fn set(&self, index: usize, bytes: u64) {
        self.part_progress.write().await.insert(index, bytes);
    }

    pub async fn get(&self, index: usize) -> u64 {
        self.part_progress.read().await.get(&index).copied().unwrap_or_default()
    }

    pub async fn total(&self) -> u64 {
        self.part_progress.read().await.values().sum()
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.total().await, Instant::now())
    }
}

/// Identity of the file the aggregator reports on.
#[derive(Debug, Clone, Copy)]
pub struct ProgressContext {
    pub item_id: ItemId,
    pub file_index: usize,
    pub total_files: usize,
    pub total_bytes: Option<u64>,
}

///# ``ProgressAggregator``
/// Samples a job's chunk counters every ``interval`` and emits ``DownloadEvent::Progress``.
///
/// The loop ends once every byte is downloaded, when ``stop`` fires (the workers are done)
/// or when the job is cancelled. Only the first two emit a closing event.
pub struct ProgressAggregator {
    progress: ChunkProgress,
    context: ProgressContext,
    sink: EventSink,
    interval: Duration,
    speed: SpeedEstimator,
}

impl ProgressAggregator {
    pub fn new(progress: ChunkProgress, context: ProgressContext, sink: EventSink, interval: Duration) -> Self {
        Self { progress, context, sink, interval, speed: SpeedEstimator::new() }
    }

    #[instrument(name = "progress_aggregator", skip_all, fields(item = self.context.item_id, file = self.context.file_index))]
    pub async fn run(mut self, job: CancellationToken, stop: CancellationToken) -> u64 {
        self.speed.reset(self.progress.snapshot().await);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = job.cancelled() => {
                    debug!("Job cancelled, progress aggregator exiting.");
                    return self.progress.total().await;
                }
                () = stop.cancelled() => {
                    let snapshot = self.progress.snapshot().await;
                    self.emit(snapshot);
                    return snapshot.bytes;
                }
                _ = ticker.tick() => {
                    let snapshot = self.progress.snapshot().await;
                    self.emit(snapshot);
                    if self.context.total_bytes.is_some_and(|total| snapshot.bytes >= total) {
                        debug!(bytes = snapshot.bytes, "All bytes downloaded, progress aggregator exiting.");
                        return snapshot.bytes;
                    }
                }
            }
        }
    }

    fn emit(&mut self, snapshot: ProgressSnapshot) {
        let speed = self.speed.sample(snapshot);
        let eta_secs = self.speed.eta(self.context.total_bytes, snapshot.bytes);
        self.sink.emit(DownloadEvent::Progress(ProgressEvent {
            item_id: self.context.item_id,
            downloaded_bytes: snapshot.bytes,
            total_bytes: self.context.total_bytes,
            file_index: self.context.file_index,
            total_files: self.context.total_files,
            speed,
            eta_secs,
        }));
    }
}
