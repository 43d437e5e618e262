use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use opendal::{ErrorKind, Operator, Writer, services};
use tracing::{debug, instrument};

use crate::domain::errors::DomainError;
use crate::domain::ports::storage_service::{ByteStream, ContainerHandle, ContainerWriter, StorageBackend};

/// Default in-memory write buffer, flushed to the backend once full or on close.
const DEFAULT_WRITE_CHUNK: usize = 4 * 1024 * 1024;

pub struct LocalFsBuilder {
    root_path: Option<PathBuf>,
    write_chunk: usize,
}

impl Default for LocalFsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFsBuilder {
    pub fn new() -> Self {
        Self { root_path: None, write_chunk: DEFAULT_WRITE_CHUNK }
    }
    ///Root directory for all container operations.
    pub fn root_path(mut self, value: PathBuf) -> Self {
        self.root_path = Some(value);
        self
    }
    ///Size of the write buffer kept per open container.
    pub fn write_chunk(mut self, value: usize) -> Self {
        self.write_chunk = value.max(1);
        self
    }
    pub fn build(self) -> Result<OpendalStorage, DomainError> {
        let root_path = self.root_path.ok_or(DomainError::Config(
            "Root directory must be provided.".into(),
        ))?;
        let root_path_as_str = root_path.to_str().ok_or(DomainError::Config(format!(
            "Can't get valid path object from path {}, invalid path",
            root_path.display()
        )))?;
        let builder = services::Fs::default().root(root_path_as_str);
        let op = Operator::new(builder)?.finish();
        debug!(root = root_path_as_str, "Initialized filesystem storage backend.");
        Ok(OpendalStorage { op, write_chunk: self.write_chunk })
    }
}

/// ``StorageBackend`` over an opendal ``Operator``.
#[derive(Clone)]
pub struct OpendalStorage {
    op: Operator,
    write_chunk: usize,
}

struct OpendalWriter {
    writer: Writer,
    closed: bool,
}

#[async_trait]
impl ContainerWriter for OpendalWriter {
    async fn write(&mut self, bytes: Bytes) -> Result<(), DomainError> {
        self.writer.write(bytes).await?;
        Ok(())
    }

    ///Flushes the in-memory buffer to the backend. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), DomainError> {
        if !self.closed {
            self.closed = true;
            self.writer.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for OpendalStorage {
    #[instrument(name = "storage_create", skip(self))]
    async fn create(&self, name: &str) -> Result<ContainerHandle, DomainError> {
        debug!("Creating empty container {name}.");
        self.op.write(name, Vec::<u8>::new()).await?;
        Ok(ContainerHandle::new(name))
    }

    async fn find(&self, name: &str) -> Result<Option<ContainerHandle>, DomainError> {
        match self.op.stat(name).await {
            Ok(_) => Ok(Some(ContainerHandle::new(name))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(name = "storage_open_append", skip(self), fields(name = handle.name()))]
    async fn open_append(&self, handle: &ContainerHandle) -> Result<Box<dyn ContainerWriter>, DomainError> {
        let writer = self
            .op
            .writer_with(handle.name())
            .chunk(self.write_chunk)
            .append(true)
            .await?;
        Ok(Box::new(OpendalWriter { writer, closed: false }))
    }

    #[instrument(name = "storage_open_truncate", skip(self), fields(name = handle.name()))]
    async fn open_truncate(&self, handle: &ContainerHandle) -> Result<Box<dyn ContainerWriter>, DomainError> {
        let writer = self.op.writer_with(handle.name()).chunk(self.write_chunk).await?;
        Ok(Box::new(OpendalWriter { writer, closed: false }))
    }

    #[instrument(name = "storage_open_read", skip(self), fields(name = handle.name()))]
    async fn open_read(&self, handle: &ContainerHandle) -> Result<ByteStream, DomainError> {
        let reader = self.op.reader(handle.name()).await?;
        let stream = reader.into_bytes_stream(..).await?;
        Ok(stream
            .map(|item| item.map_err(|err| DomainError::Storage(err.to_string())))
            .boxed())
    }

    async fn length(&self, handle: &ContainerHandle) -> Result<u64, DomainError> {
        Ok(self.op.stat(handle.name()).await?.content_length())
    }

    #[instrument(name = "storage_delete", skip(self), fields(name = handle.name()))]
    async fn delete(&self, handle: &ContainerHandle) -> Result<bool, DomainError> {
        if self.find(handle.name()).await?.is_none() {
            return Ok(false);
        }
        self.op.delete(handle.name()).await?;
        debug!("Deleted container {}.", handle.name());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn storage() -> (tempfile::TempDir, OpendalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsBuilder::new()
            .root_path(dir.path().to_path_buf())
            .build()
            .unwrap();
        (dir, storage)
    }

    async fn read_all(storage: &OpendalStorage, name: &str) -> Vec<u8> {
        let stream = storage.open_read(&ContainerHandle::new(name)).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_append_across_writers() -> anyhow::Result<()> {
        let (_dir, storage) = storage();
        let handle = storage.find_or_create("game/setup.exe.part0").await?;
        assert_eq!(storage.length(&handle).await?, 0);

        let mut writer = storage.open_append(&handle).await?;
        writer.write(Bytes::from_static(b"hello ")).await?;
        writer.close().await?;

        let mut writer = storage.open_append(&handle).await?;
        writer.write(Bytes::from_static(b"world")).await?;
        writer.close().await?;
        writer.close().await?;

        assert_eq!(storage.length(&handle).await?, 11);
        assert_eq!(read_all(&storage, "game/setup.exe.part0").await, b"hello world");
        Ok(())
    }

    #[tokio::test]
    async fn test_truncate_discards_previous_content() -> anyhow::Result<()> {
        let (_dir, storage) = storage();
        let handle = storage.create("out.bin").await?;
        let mut writer = storage.open_append(&handle).await?;
        writer.write(Bytes::from_static(b"stale content")).await?;
        writer.close().await?;

        let mut writer = storage.open_truncate(&handle).await?;
        writer.write(Bytes::from_static(b"new")).await?;
        writer.close().await?;
        assert_eq!(read_all(&storage, "out.bin").await, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn test_find_and_delete() -> anyhow::Result<()> {
        let (_dir, storage) = storage();
        assert!(storage.find("missing.bin").await?.is_none());
        assert_eq!(storage.length_of("missing.bin").await?, None);
        assert!(!storage.delete_named("missing.bin").await?);

        storage.create("present.bin").await?;
        assert_eq!(storage.length_of("present.bin").await?, Some(0));
        assert!(storage.delete_named("present.bin").await?);
        assert!(storage.find("present.bin").await?.is_none());
        Ok(())
    }
}
