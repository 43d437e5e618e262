use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::domain::errors::DomainError;
use crate::domain::models::{ByteRange, ChunkDescriptor};
use crate::domain::ports::download_service::{RangeTransport, TransferResponse};
use crate::domain::ports::storage_service::{ContainerWriter, StorageBackend};
use crate::domain::services::progress::ChunkProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The container holds the whole range (or the whole body for an unknown size).
    Completed { bytes: u64 },
    /// Stopped on request, the written prefix is kept.
    Cancelled,
}

/// Fills one part container with the bytes of one chunk, resuming from whatever it already holds.
#[derive(Clone)]
pub struct ChunkWorker {
    transport: Arc<dyn RangeTransport>,
    storage: Arc<dyn StorageBackend>,
    url: Url,
    progress: ChunkProgress,
    buffer_size: usize,
}

impl ChunkWorker {
    pub fn new(
        transport: Arc<dyn RangeTransport>,
        storage: Arc<dyn StorageBackend>,
        url: Url,
        progress: ChunkProgress,
        buffer_size: usize,
    ) -> Self {
        Self { transport, storage, url, progress, buffer_size: buffer_size.max(1) }
    }

    /// Download ``chunk`` into its container.
    ///
    /// With ``ranged`` set the request carries ``Range`` for the part of the chunk not yet
    /// stored and only ``206`` is accepted. Without it a plain GET is issued and the
    /// container is restarted from zero.
    #[instrument(name = "chunk_worker", skip(self, chunk, token), fields(index = chunk.index, container = %chunk.container))]
    pub async fn run(
        &self,
        chunk: ChunkDescriptor,
        ranged: bool,
        token: CancellationToken,
    ) -> Result<ChunkOutcome, DomainError> {
        let mut handle = self.storage.find_or_create(&chunk.container).await?;
        let mut written = self.storage.length(&handle).await?;

        if !ranged && written > 0 {
            debug!(written, "Plain request can't resume, restarting container.");
            handle = self.storage.create(&chunk.container).await?;
            written = 0;
        }
        if let Some(range) = chunk.range {
            if written > range.len() {
                return Err(DomainError::Storage(format!(
                    "Container {} holds {written} bytes, more than its range {range}",
                    chunk.container
                )));
            }
        }
        self.progress.set(chunk.index, written).await;

        let request = match (chunk.range, ranged) {
            (Some(range), true) => match range.remaining_after(written) {
                Some(remaining) => Some(remaining),
                None => {
                    debug!(written, "Chunk already complete, skipping request.");
                    return Ok(ChunkOutcome::Completed { bytes: written });
                }
            },
            _ => None,
        };
        if token.is_cancelled() {
            return Ok(ChunkOutcome::Cancelled);
        }

        debug!(offset = written, request = ?request, "Requesting chunk bytes.");
        let mut response = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(ChunkOutcome::Cancelled),
            response = self.transport.fetch(&self.url, request) => response?,
        };
        if let Err(err) = self.check_status(&response, request) {
            response.abort();
            return Err(err);
        }

        let mut writer = self.storage.open_append(&handle).await?;
        let pumped = self
            .pump(&mut response, writer.as_mut(), &chunk, &mut written, &token)
            .await;
        // Close on every path so buffered bytes reach the container before we report.
        let closed = writer.close().await;
        response.abort();
        let cancelled = pumped?;
        closed?;
        self.progress.set(chunk.index, written).await;

        if cancelled {
            debug!(written, "Chunk paused by cancellation.");
            return Ok(ChunkOutcome::Cancelled);
        }
        if let Some(expected) = chunk.expected_len() {
            if written < expected {
                return Err(DomainError::IncompleteChunk { index: chunk.index, written, expected });
            }
        }
        debug!(written, "Chunk completed.");
        Ok(ChunkOutcome::Completed { bytes: written })
    }

    fn check_status(&self, response: &TransferResponse, request: Option<ByteRange>) -> Result<(), DomainError> {
        match request {
            Some(_) if response.is_partial() => Ok(()),
            Some(_) if response.is_success() => Err(DomainError::RangeNotHonoured(self.url.to_string())),
            None if response.is_success() => Ok(()),
            _ => Err(DomainError::UnexpectedStatus { status: response.status, url: self.url.to_string() }),
        }
    }

    /// Copy the body into ``writer`` in ``buffer_size`` slices.
    /// Returns ``true`` when stopped by cancellation.
    async fn pump(
        &self,
        response: &mut TransferResponse,
        writer: &mut dyn ContainerWriter,
        chunk: &ChunkDescriptor,
        written: &mut u64,
        token: &CancellationToken,
    ) -> Result<bool, DomainError> {
        let expected = chunk.expected_len();
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(true),
                next = response.body.next() => next,
            };
            let Some(item) = next else {
                return Ok(false);
            };
            let mut bytes: Bytes = item?;

            if let Some(expected) = expected {
                let room = expected.saturating_sub(*written);
                if bytes.len() as u64 > room {
                    warn!(excess = bytes.len() as u64 - room, "Server sent more bytes than requested, discarding the excess.");
                    bytes.truncate(room as usize);
                }
            }

            while !bytes.is_empty() {
                let slice = bytes.split_to(self.buffer_size.min(bytes.len()));
                let len = slice.len() as u64;
                writer.write(slice).await?;
                *written += len;
                self.progress.set(chunk.index, *written).await;
                if token.is_cancelled() {
                    return Ok(true);
                }
            }

            if expected.is_some_and(|expected| *written >= expected) {
                return Ok(false);
            }
        }
    }
}
