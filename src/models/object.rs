//! Represents object listings and download results.

use bytes::Bytes;
use serde::Serialize;

use super::table::Table;

/// One page returned by a `ListObjectsV2`-style call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys on this page, in backend order.
    pub keys: Vec<String>,

    /// Whether the backend reports more keys after this page.
    pub is_truncated: bool,

    /// Token to pass back for the next page. Some backends omit it or send
    /// an empty string on the last page.
    pub next_continuation_token: Option<String>,
}

/// Result of downloading an object.
///
/// Keys with a recognized tabular extension are decoded into a [`Table`];
/// everything else comes back as the raw bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum Download {
    Table(Table),
    Raw(Bytes),
}

/// Outcome of emptying a bucket, object by object.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EmptyReport {
    /// Keys that were deleted, in deletion order.
    pub deleted: Vec<String>,

    /// Keys still present when the operation stopped.
    pub remaining: Vec<String>,
}

impl EmptyReport {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// What an upload did.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub bucket: String,
    pub key: String,
    pub size_bytes: usize,

    /// Number of parts sent; 1 for a single-part put.
    pub parts: usize,
}
