use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Network error: {0}")]
    Transfer(String),
    #[error("Unexpected response status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },
    #[error("Server ignored byte range request for {0}")]
    RangeNotHonoured(String),
    #[error("Chunk {index} ended after {written} of {expected} bytes")]
    IncompleteChunk { index: usize, written: u64, expected: u64 },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Assembly error: {0}")]
    Assembly(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Item {0} is already being downloaded")]
    AlreadyActive(u64),
    #[error("An unexpected error occurred: {message}")]
    Other { message: String },
}

impl From<opendal::Error> for DomainError {
    fn from(err: opendal::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Storage(format!("Can't (de)serialize state: {err}"))
    }
}

impl From<tokio::task::JoinError> for DomainError {
    fn from(err: tokio::task::JoinError) -> Self {
        DomainError::Other { message: format!("Download task panicked or was aborted: {err}") }
    }
}
