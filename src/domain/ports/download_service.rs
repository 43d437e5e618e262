use async_trait::async_trait;
use tokio::task::JoinHandle;
use url::Url;

use crate::domain::errors::DomainError;
use crate::domain::models::ByteRange;
use crate::domain::ports::storage_service::ByteStream;

pub const STATUS_OK: u16 = 200;
pub const STATUS_PARTIAL_CONTENT: u16 = 206;

/// What a metadata-only request tells about a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteInfo {
    pub total_size: Option<u64>,
    pub supports_ranges: bool,
}

impl RemoteInfo {
    pub fn new(total_size: Option<u64>, supports_ranges: bool) -> Self {
        Self { total_size, supports_ranges }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// A response whose body is being pumped into ``body`` by ``producer``.
pub struct TransferResponse {
    pub status: u16,
    pub body: ByteStream,
    pub producer: Option<JoinHandle<()>>,
}

impl TransferResponse {
    pub fn is_partial(&self) -> bool {
        self.status == STATUS_PARTIAL_CONTENT
    }

    /// Any ``2xx`` status.
    pub fn is_success(&self) -> bool {
        (STATUS_OK..300).contains(&self.status)
    }

    /// Stop the background body producer, if any.
    pub fn abort(&self) {
        if let Some(producer) = &self.producer {
            producer.abort();
        }
    }
}

///# RangeTransport
/// trait for fetching a remote file, whole or by byte range.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Issue a header-only request for ``url``.
    async fn inspect(&self, url: &Url) -> Result<RemoteInfo, DomainError>;

    /// GET ``url``, restricted to ``range`` when one is given.
    /// Non-success statuses are returned, not turned into errors, so callers can decide.
    async fn fetch(&self, url: &Url, range: Option<ByteRange>) -> Result<TransferResponse, DomainError>;
}
