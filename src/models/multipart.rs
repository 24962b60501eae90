//! Represents multipart upload sessions and their parts.

use serde::{Deserialize, Serialize};

/// A multipart upload session opened on the backend.
///
/// Nothing uploaded under a session is visible until it is completed;
/// aborting discards every staged part.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MultipartUpload {
    /// Target bucket.
    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    /// Backend-assigned upload identifier.
    pub upload_id: String,
}

/// A part that landed on the backend and must be listed on completion.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    /// Part number (1-based).
    pub part_number: i32,

    /// ETag returned by the backend for this part.
    pub etag: String,

    /// Size in bytes.
    pub size_bytes: usize,
}

/// Split `len` bytes into `(offset, length)` ranges of at most `part_size`.
///
/// Every range except the last has exactly `part_size` bytes.
pub fn part_ranges(len: usize, part_size: usize) -> Vec<(usize, usize)> {
    let part_size = part_size.max(1);
    let mut ranges = Vec::with_capacity(len.div_ceil(part_size));
    let mut offset = 0;
    while offset < len {
        let size = part_size.min(len - offset);
        ranges.push((offset, size));
        offset += size;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_content_exactly() {
        let ranges = part_ranges(11, 5);
        assert_eq!(ranges, vec![(0, 5), (5, 5), (10, 1)]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let ranges = part_ranges(10, 5);
        assert_eq!(ranges, vec![(0, 5), (5, 5)]);
        assert!(part_ranges(0, 5).is_empty());
    }
}
