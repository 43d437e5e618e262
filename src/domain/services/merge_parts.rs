use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::ChunkDescriptor;
use crate::domain::ports::storage_service::{ByteStream, ContainerHandle, ContainerWriter, StorageBackend};

/// Concatenates a job's part containers into its final output.
pub struct MergeParts<'a> {
    storage: &'a dyn StorageBackend,
    output: &'a str,
    copy_buffer: usize,
}

impl<'a> MergeParts<'a> {
    pub fn new(storage: &'a dyn StorageBackend, output: &'a str, copy_buffer: usize) -> Self {
        Self { storage, output, copy_buffer: copy_buffer.max(1) }
    }

    /// Copy every part into the output in index order, then delete the parts.
    ///
    /// Every part must exist and hold exactly its range before the output is opened;
    /// otherwise ``DomainError::Assembly`` is returned and nothing is modified.
    #[instrument(name = "merge_parts", skip(self, parts), fields(output = self.output, parts = parts.len()))]
    pub async fn merge(&self, parts: &[ChunkDescriptor]) -> Result<u64, DomainError> {
        let mut ordered: Vec<&ChunkDescriptor> = parts.iter().collect();
        ordered.sort_by_key(|part| part.index);

        let handles = self.verify(&ordered).await?;
        let mut streams = Vec::with_capacity(handles.len());
        for handle in &handles {
            let stream = self.storage.open_read(handle).await.map_err(|err| {
                DomainError::Assembly(format!("Part {} is unreadable: {err}", handle.name()))
            })?;
            streams.push((handle.name().to_string(), stream));
        }

        let output = self.storage.find_or_create(self.output).await?;
        let mut writer = self.storage.open_truncate(&output).await?;
        let mut copied = 0u64;
        let mut result = Ok(());
        for (name, stream) in streams {
            match self.copy(stream, writer.as_mut()).await {
                Ok(bytes) => {
                    debug!(part = %name, bytes, "Copied part.");
                    copied += bytes;
                }
                Err(err) => {
                    result = Err(DomainError::Assembly(format!("Copying {name} failed: {err}")));
                    break;
                }
            }
        }
        let closed = writer.close().await;
        result?;
        closed?;

        for handle in &handles {
            if !self.storage.delete(handle).await? {
                warn!(part = handle.name(), "Part vanished before it could be deleted.");
            }
        }
        info!(bytes = copied, "Assembled output.");
        Ok(copied)
    }

    async fn verify(&self, parts: &[&ChunkDescriptor]) -> Result<Vec<ContainerHandle>, DomainError> {
        let mut handles = Vec::with_capacity(parts.len());
        for part in parts {
            let Some(handle) = self.storage.find(&part.container).await? else {
                return Err(DomainError::Assembly(format!("Part {} is missing", part.container)));
            };
            let length = self.storage.length(&handle).await?;
            let expected = part.expected_len().ok_or_else(|| {
                DomainError::Assembly(format!("Part {} has no byte range", part.container))
            })?;
            if length != expected {
                return Err(DomainError::Assembly(format!(
                    "Part {} holds {length} of {expected} bytes",
                    part.container
                )));
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    async fn copy(&self, mut stream: ByteStream, writer: &mut dyn ContainerWriter) -> Result<u64, DomainError> {
        let mut copied = 0u64;
        while let Some(chunk) = stream.next().await {
            let mut chunk = chunk?;
            while !chunk.is_empty() {
                let slice = chunk.split_to(self.copy_buffer.min(chunk.len()));
                copied += slice.len() as u64;
                writer.write(slice).await?;
            }
        }
        Ok(copied)
    }
}
