//! # Split Parts
//!
//! This module contains the logic for deciding between a single stream and a
//! chunked download, and for splitting a file into parts for parallel downloading.

use tracing::debug;

use crate::domain::models::{ByteRange, ChunkPlan, Strategy};
use crate::domain::ports::download_service::RemoteInfo;

/// Splits a given file size into ``count`` contiguous byte ranges.
///
/// Every range but the last holds ``file_size_bytes / count`` bytes, the last
/// one absorbs the remainder of the division. The result only depends on the
/// arguments, so the same partition is re-derived on every resume.
///
/// # Arguments
///
/// * `file_size_bytes` - The total size of the file in bytes.
/// * `count` - The number of parts, clamped so no part is empty.
pub fn split_parts(file_size_bytes: u64, count: usize) -> Vec<ByteRange> {
    if file_size_bytes == 0 {
        return vec![];
    }
    let count = (count.max(1) as u64).min(file_size_bytes);
    let chunk_bytes = file_size_bytes / count;

    let mut parts = Vec::with_capacity(count as usize);
    let mut current_start = 0;
    for i in 0..count {
        let current_end = if i == count - 1 {
            file_size_bytes - 1
        } else {
            current_start + chunk_bytes - 1
        };
        parts.push(ByteRange::new(current_start, current_end));
        current_start = current_end + 1;
    }
    parts
}

/// Choose the download strategy for an inspected file.
///
/// Single stream when the size is unknown, below ``threshold`` or the server doesn't
/// support byte ranges; otherwise ``chunk_count`` ranges.
pub fn plan(remote: RemoteInfo, chunk_count: usize, threshold: u64) -> ChunkPlan {
    let Some(total_size) = remote.total_size else {
        debug!("Unknown download size, planning a single stream.");
        return ChunkPlan::new(Strategy::SingleStream, None, vec![], false);
    };

    if total_size < threshold || !remote.supports_ranges || chunk_count <= 1 {
        debug!(
            total_size,
            supports_ranges = remote.supports_ranges,
            "Planning a single stream."
        );
        return ChunkPlan::new(
            Strategy::SingleStream,
            Some(total_size),
            split_parts(total_size, 1),
            remote.supports_ranges,
        );
    }

    let ranges = split_parts(total_size, chunk_count);
    debug!(total_size, chunks = ranges.len(), "Planning a chunked download.");
    ChunkPlan::new(
        Strategy::Chunked { count: ranges.len() },
        Some(total_size),
        ranges,
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_partition(ranges: &[ByteRange], size: u64) {
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(size - 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap in {ranges:?}");
        }
        assert_eq!(ranges.iter().map(ByteRange::len).sum::<u64>(), size);
    }

    #[test]
    fn test_split_parts_zero_file_size() {
        assert!(split_parts(0, 4).is_empty());
    }

    #[test]
    fn test_split_parts_partitions_exactly() {
        for size in [1, 2, 3, 4, 5, 7, 1000, 1001, 1003, 40 * MIB + 3, 9_999_999_999] {
            for count in 1..=8 {
                let parts = split_parts(size, count);
                assert_eq!(parts.len() as u64, (count as u64).min(size));
                assert_partition(&parts, size);
            }
        }
    }

    #[test]
    fn test_last_part_absorbs_remainder() {
        let parts = split_parts(10, 4);
        assert_eq!(
            parts,
            vec![
                ByteRange::new(0, 1),
                ByteRange::new(2, 3),
                ByteRange::new(4, 5),
                ByteRange::new(6, 9),
            ]
        );
    }

    #[test]
    fn test_split_parts_is_deterministic() {
        assert_eq!(split_parts(123_456_789, 4), split_parts(123_456_789, 4));
    }

    #[test]
    fn test_plan_40_mib_with_ranges() {
        let plan = plan(RemoteInfo::new(Some(40 * MIB), true), 4, 10 * MIB);
        assert_eq!(*plan.strategy(), Strategy::Chunked { count: 4 });
        assert!(plan.ranges().iter().all(|r| r.len() == 10 * MIB));
    }

    #[test]
    fn test_plan_small_file_single_stream() {
        let plan = plan(RemoteInfo::new(Some(2 * MIB), true), 4, 10 * MIB);
        assert_eq!(*plan.strategy(), Strategy::SingleStream);
        assert_eq!(plan.ranges(), &vec![ByteRange::new(0, 2 * MIB - 1)]);
    }

    #[test]
    fn test_plan_without_range_support_single_stream() {
        let plan = plan(RemoteInfo::new(Some(4096 * MIB), false), 4, 10 * MIB);
        assert_eq!(*plan.strategy(), Strategy::SingleStream);
        assert!(!plan.supports_ranges());
    }

    #[test]
    fn test_plan_unknown_size() {
        let plan = plan(RemoteInfo::unknown(), 4, 10 * MIB);
        assert_eq!(*plan.strategy(), Strategy::SingleStream);
        assert_eq!(*plan.total_size(), None);
        assert!(plan.ranges().is_empty());
    }

    #[test]
    fn test_plan_threshold_is_exclusive() {
        let plan = plan(RemoteInfo::new(Some(10 * MIB), true), 4, 10 * MIB);
        assert!(plan.is_chunked());
    }
}
