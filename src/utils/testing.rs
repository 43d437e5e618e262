//! Test doubles for the engine's ports.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::domain::errors::DomainError;
use crate::domain::models::{ByteRange, DownloadRecord, ItemId, RecordStatus};
use crate::domain::ports::download_service::{
    RemoteInfo, RangeTransport, STATUS_OK, STATUS_PARTIAL_CONTENT, TransferResponse,
};
use crate::domain::ports::record_store::RecordStore;
use crate::infra::storage::fs_adapter::{LocalFsBuilder, OpendalStorage};

/// Serves one in-memory file, by range or whole, and records every request.
pub struct MemoryTransport {
    content: Bytes,
    supports_ranges: bool,
    advertise_size: bool,
    inspect_fails: bool,
    ignore_ranges: bool,
    piece_size: usize,
    fail_at: Option<u64>,
    stall_at: Option<u64>,
    requests: Mutex<Vec<Option<ByteRange>>>,
}

impl MemoryTransport {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            supports_ranges: true,
            advertise_size: true,
            inspect_fails: false,
            ignore_ranges: false,
            piece_size: 4096,
            fail_at: None,
            stall_at: None,
            requests: Mutex::new(vec![]),
        }
    }

    /// Metadata requests answer without ``Accept-Ranges``.
    pub fn without_ranges(mut self) -> Self {
        self.supports_ranges = false;
        self
    }

    /// Metadata requests answer without ``Content-Length``.
    pub fn hide_size(mut self) -> Self {
        self.advertise_size = false;
        self
    }

    pub fn fail_inspect(mut self) -> Self {
        self.inspect_fails = true;
        self
    }

    /// Advertise range support but answer ranged requests with ``200`` and the whole body.
    pub fn ignore_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    pub fn piece_size(mut self, size: usize) -> Self {
        self.piece_size = size.max(1);
        self
    }

    /// Bodies crossing absolute offset ``offset`` error out right before it.
    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    /// Bodies crossing absolute offset ``offset`` stop producing right before it, forever.
    pub fn stall_at(mut self, offset: u64) -> Self {
        self.stall_at = Some(offset);
        self
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn requests(&self) -> Vec<Option<ByteRange>> {
        self.requests.lock().unwrap().clone()
    }

    /// Start offsets of every ranged request, sorted.
    pub fn requested_starts(&self) -> Vec<u64> {
        let mut starts: Vec<u64> = self.requests().into_iter().flatten().map(|r| r.start).collect();
        starts.sort_unstable();
        starts
    }
}

#[async_trait]
impl RangeTransport for MemoryTransport {
    async fn inspect(&self, _url: &Url) -> Result<RemoteInfo, DomainError> {
        if self.inspect_fails {
            return Err(DomainError::Transfer("connection refused".into()));
        }
        let total_size = self.advertise_size.then_some(self.content.len() as u64);
        Ok(RemoteInfo::new(total_size, self.supports_ranges))
    }

    async fn fetch(&self, _url: &Url, range: Option<ByteRange>) -> Result<TransferResponse, DomainError> {
        self.requests.lock().unwrap().push(range);
        let len = self.content.len() as u64;
        let (status, start, end) = match range {
            Some(range) if self.supports_ranges && !self.ignore_ranges && range.start < len => {
                (STATUS_PARTIAL_CONTENT, range.start, range.end.min(len - 1) + 1)
            }
            _ => (STATUS_OK, 0, len),
        };

        let mut items: Vec<Result<Bytes, DomainError>> = vec![];
        let mut stalled = false;
        let mut offset = start;
        while offset < end {
            let mut piece_end = (offset + self.piece_size as u64).min(end);
            if let Some(fail) = self.fail_at.filter(|f| *f > offset && *f < piece_end) {
                piece_end = fail;
            }
            if let Some(stall) = self.stall_at.filter(|s| *s >= offset && *s < piece_end) {
                piece_end = stall;
                stalled = true;
            }
            if piece_end > offset {
                items.push(Ok(self.content.slice(offset as usize..piece_end as usize)));
            }
            if stalled {
                break;
            }
            if self.fail_at == Some(piece_end) && piece_end < end {
                items.push(Err(DomainError::Transfer("connection reset by peer".into())));
                break;
            }
            offset = piece_end;
        }

        let body = if stalled {
            stream::iter(items).chain(stream::pending()).boxed()
        } else {
            stream::iter(items).boxed()
        };
        Ok(TransferResponse { status, body, producer: None })
    }
}

/// Dispatches to a ``MemoryTransport`` per url, unknown urls answer ``404``.
#[derive(Default)]
pub struct UrlRouter {
    routes: HashMap<String, MemoryTransport>,
}

impl UrlRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, transport: MemoryTransport) -> Self {
        self.routes.insert(url.to_string(), transport);
        self
    }
}

#[async_trait]
impl RangeTransport for UrlRouter {
    async fn inspect(&self, url: &Url) -> Result<RemoteInfo, DomainError> {
        match self.routes.get(url.as_str()) {
            Some(transport) => transport.inspect(url).await,
            None => Ok(RemoteInfo::unknown()),
        }
    }

    async fn fetch(&self, url: &Url, range: Option<ByteRange>) -> Result<TransferResponse, DomainError> {
        match self.routes.get(url.as_str()) {
            Some(transport) => transport.fetch(url, range).await,
            None => Ok(TransferResponse { status: 404, body: stream::empty().boxed(), producer: None }),
        }
    }
}

/// Deterministic, non-trivial file content.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251 % 256) as u8).collect()
}

pub fn temp_storage() -> (tempfile::TempDir, OpendalStorage) {
    let dir = tempfile::tempdir().expect("can't create temp dir");
    let storage = LocalFsBuilder::new()
        .root_path(dir.path().to_path_buf())
        .write_chunk(64 * 1024)
        .build()
        .expect("can't build storage");
    (dir, storage)
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: AsyncMutex<Vec<DownloadRecord>>,
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_all(&self) -> Result<Vec<DownloadRecord>, DomainError> {
        Ok(self.records.lock().await.clone())
    }

    async fn upsert(&self, record: DownloadRecord) -> Result<(), DomainError> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.same_file(*record.item_id(), record.file_id())) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn set_status(&self, item_id: ItemId, file_id: &str, status: RecordStatus) -> Result<bool, DomainError> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.same_file(item_id, file_id)) {
            Some(record) => {
                record.set_status(status);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
