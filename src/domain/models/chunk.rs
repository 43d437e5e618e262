use std::fmt;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

/// Inclusive byte range ``[start, end]`` of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    ///Range still to be requested once ``written`` bytes of this range are stored.
    /// Returns ``None`` when nothing is left.
    pub fn remaining_after(&self, written: u64) -> Option<ByteRange> {
        if written >= self.len() {
            return None;
        }
        Some(ByteRange::new(self.start + written, self.end))
    }

    /// Value for the http ``Range`` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    SingleStream,
    Chunked { count: usize },
}

///# ``ChunkPlan``
/// Output of the chunk planner.
/// * ``total_size`` : Size of the remote file, ``None`` when the server didn't tell.
/// * ``ranges`` : Contiguous ranges partitioning ``[0, total_size)``. Empty when the size is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct ChunkPlan {
    strategy: Strategy,
    total_size: Option<u64>,
    ranges: Vec<ByteRange>,
    supports_ranges: bool,
}

impl ChunkPlan {
    pub fn new(
        strategy: Strategy,
        total_size: Option<u64>,
        ranges: Vec<ByteRange>,
        supports_ranges: bool,
    ) -> Self {
        Self { strategy, total_size, ranges, supports_ranges }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.strategy, Strategy::Chunked { .. })
    }

    pub fn chunk_count(&self) -> usize {
        match self.strategy {
            Strategy::SingleStream => 1,
            Strategy::Chunked { count } => count,
        }
    }
}

/// One unit of work for a chunk worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: usize,
    /// ``None`` for a single stream of unknown length.
    pub range: Option<ByteRange>,
    /// Name of the part container in the storage backend.
    pub container: String,
    /// Bytes already stored in the container.
    pub written: u64,
}

impl ChunkDescriptor {
    pub fn new(index: usize, range: Option<ByteRange>, container: String, written: u64) -> Self {
        Self { index, range, container, written }
    }

    pub fn expected_len(&self) -> Option<u64> {
        self.range.map(|range| range.len())
    }

    pub fn is_complete(&self) -> bool {
        self.expected_len().is_some_and(|len| self.written == len)
    }
}
