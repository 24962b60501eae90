//! Represents a bucket as reported by the object backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default location/tier used when the caller does not name one.
pub const DEFAULT_BUCKET_LOCATION: &str = "us-south-smart";

/// A bucket visible to the configured credentials.
///
/// Bucket names are global across the backend, so the name alone identifies
/// the bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Globally unique bucket name.
    pub name: String,

    /// Creation time, when the backend reports one.
    pub created_at: Option<DateTime<Utc>>,
}
