use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;

use crate::domain::errors::DomainError;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DomainError>> + Send + 'static>>;

/// Address of a container inside a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    name: String,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sequential writer into one container.
///
/// Bytes may be buffered until ``close`` is called, callers must close the
/// writer on every exit path or the buffered tail is lost.
#[async_trait]
pub trait ContainerWriter: Send {
    async fn write(&mut self, bytes: Bytes) -> Result<(), DomainError>;
    async fn close(&mut self) -> Result<(), DomainError>;
}

/// The capability set the download engine needs from wherever files end up.
///
/// The engine never assumes a native filesystem path, it only uses these operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create an empty container, truncating an existing one.
    async fn create(&self, name: &str) -> Result<ContainerHandle, DomainError>;

    async fn find(&self, name: &str) -> Result<Option<ContainerHandle>, DomainError>;

    async fn open_append(&self, handle: &ContainerHandle) -> Result<Box<dyn ContainerWriter>, DomainError>;

    /// Open for writing from byte zero, discarding previous content.
    async fn open_truncate(&self, handle: &ContainerHandle) -> Result<Box<dyn ContainerWriter>, DomainError>;

    async fn open_read(&self, handle: &ContainerHandle) -> Result<ByteStream, DomainError>;

    async fn length(&self, handle: &ContainerHandle) -> Result<u64, DomainError>;

    /// Returns ``false`` when there was nothing to delete.
    async fn delete(&self, handle: &ContainerHandle) -> Result<bool, DomainError>;

    async fn find_or_create(&self, name: &str) -> Result<ContainerHandle, DomainError> {
        match self.find(name).await? {
            Some(handle) => Ok(handle),
            None => self.create(name).await,
        }
    }

    /// Length of the named container, ``None`` if it doesn't exist.
    async fn length_of(&self, name: &str) -> Result<Option<u64>, DomainError> {
        match self.find(name).await? {
            Some(handle) => Ok(Some(self.length(&handle).await?)),
            None => Ok(None),
        }
    }

    async fn delete_named(&self, name: &str) -> Result<bool, DomainError> {
        match self.find(name).await? {
            Some(handle) => self.delete(&handle).await,
            None => Ok(false),
        }
    }
}
