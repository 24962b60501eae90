//! src/services/object_store.rs
//!
//! ObjectStore: bucket and object operations over any [`ObjectBackend`].
//! Listing follows continuation tokens to the end, large uploads are split
//! into multipart sessions, and tabular downloads are decoded on the way
//! out.

use super::{
    object_backend::ObjectBackend,
    tabular::{self, TabularFormat},
};
use crate::models::{
    bucket::{BucketInfo, DEFAULT_BUCKET_LOCATION},
    multipart::{MultipartUpload, UploadedPart, part_ranges},
    object::{Download, EmptyReport, UploadSummary},
};
use bytes::Bytes;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Payloads strictly larger than this go through a multipart session.
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 15 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
/// Upper bound on listing calls for one enumeration.
pub const MAX_LIST_PAGES: usize = 100_000;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("bucket `{0}` already exists")]
    AlreadyExists(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{0}` is not empty")]
    NotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("transfer of `{key}` to bucket `{bucket}` failed: {message}")]
    Transfer {
        bucket: String,
        key: String,
        message: String,
    },
    #[error(
        "emptying bucket `{bucket}` stopped after {} of {} objects: {source}",
        .deleted.len(),
        .deleted.len() + .remaining.len()
    )]
    PartialEmpty {
        bucket: String,
        deleted: Vec<String>,
        remaining: Vec<String>,
        #[source]
        source: Box<ObjectError>,
    },
    #[error("cannot decode `{key}`: {message}")]
    Decode { key: String, message: String },
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

pub type ObjectResult<T> = Result<T, ObjectError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferConfig {
    pub multipart_threshold: usize,
    pub part_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Object key rules: non-empty, at most 1024 bytes, no control characters.
fn ensure_key_safe(key: &str) -> ObjectResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ObjectError::InvalidObjectKey);
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(ObjectError::InvalidObjectKey);
    }
    Ok(())
}

/// S3 bucket naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not shaped like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> ObjectResult<()> {
    let invalid = |reason: &str| ObjectError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

/// Failures inside a multipart session surface as `Transfer`, except
/// those that say something more useful about the target.
fn as_transfer_error(bucket: &str, key: &str, err: ObjectError) -> ObjectError {
    match err {
        ObjectError::BucketNotFound(_)
        | ObjectError::Permission(_)
        | ObjectError::Transfer { .. } => err,
        other => ObjectError::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: other.to_string(),
        },
    }
}

/// ObjectStore is cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    transfer: TransferConfig,
    page_size: usize,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            backend,
            transfer: TransferConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = TransferConfig {
            multipart_threshold: transfer.multipart_threshold,
            part_size: transfer.part_size.max(1),
        };
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Create `name` at `location` (the default location when `None`).
    pub async fn create_bucket(&self, name: &str, location: Option<&str>) -> ObjectResult<()> {
        ensure_bucket_name_safe(name)?;
        let location = location.unwrap_or(DEFAULT_BUCKET_LOCATION);
        self.backend.create_bucket(name, location).await.map_err(|err| {
            error!(bucket = name, "create bucket failed: {}", err);
            err
        })?;
        info!(bucket = name, location, "bucket created");
        Ok(())
    }

    pub async fn list_buckets(&self) -> ObjectResult<Vec<BucketInfo>> {
        self.backend.list_buckets().await.map_err(|err| {
            error!(backend = self.backend.name(), "list buckets failed: {}", err);
            err
        })
    }

    pub async fn bucket_exists(&self, name: &str) -> ObjectResult<bool> {
        self.backend.bucket_exists(name).await.map_err(|err| {
            error!(bucket = name, "bucket lookup failed: {}", err);
            err
        })
    }

    /// Every key in `bucket` (under `prefix`), following continuation
    /// tokens until the backend reports the end.
    ///
    /// The loop ends on a page that is not truncated or on an empty page.
    /// A truncated page without a usable token, a token that repeats, or
    /// more than [`MAX_LIST_PAGES`] pages is an error rather than a silently
    /// short listing. Keys are returned once each, in backend order.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_size: usize,
    ) -> ObjectResult<Vec<String>> {
        let page_size = page_size.max(1);
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self
                .backend
                .list_page(bucket, prefix, token.as_deref(), page_size)
                .await
                .map_err(|err| {
                    error!(bucket, listed = keys.len(), "listing page failed: {}", err);
                    err
                })?;

            let fetched = page.keys.len();
            for key in page.keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if !page.is_truncated {
                return Ok(keys);
            }
            if fetched == 0 {
                warn!(bucket, "truncated listing page was empty; treating as end of listing");
                return Ok(keys);
            }

            let next = page.next_continuation_token.filter(|t| !t.is_empty());
            match next {
                None => {
                    error!(bucket, "truncated listing page carried no continuation token");
                    return Err(ObjectError::Backend {
                        operation: "list_objects",
                        message: "truncated page carried no continuation token".into(),
                    });
                }
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    error!(bucket, "listing continuation token repeated");
                    return Err(ObjectError::Backend {
                        operation: "list_objects",
                        message: "backend repeated its continuation token".into(),
                    });
                }
                Some(next) => token = Some(next),
            }
        }

        error!(bucket, pages = MAX_LIST_PAGES, "listing did not terminate");
        Err(ObjectError::Backend {
            operation: "list_objects",
            message: format!("listing exceeded {} pages", MAX_LIST_PAGES),
        })
    }

    /// Store `content` under `key`. Payloads larger than the multipart
    /// threshold are sent as fixed-size parts; any failure aborts the session
    /// so no partial object becomes visible.
    pub async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
    ) -> ObjectResult<UploadSummary> {
        ensure_key_safe(key)?;
        let size_bytes = content.len();

        let parts = if size_bytes > self.transfer.multipart_threshold {
            self.upload_multipart(bucket, key, content).await?
        } else {
            self.backend
                .put_object(bucket, key, content)
                .await
                .map_err(|err| {
                    error!(bucket, key, "upload failed: {}", err);
                    err
                })?;
            1
        };

        info!(bucket, key, bytes = size_bytes, parts, "object uploaded");
        Ok(UploadSummary {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
            parts,
        })
    }

    async fn upload_multipart(&self, bucket: &str, key: &str, content: Bytes) -> ObjectResult<usize> {
        let upload = self
            .backend
            .create_multipart(bucket, key)
            .await
            .map_err(|err| as_transfer_error(bucket, key, err))?;
        debug!(bucket, key, upload_id = %upload.upload_id, "multipart session opened");

        let result = match self.upload_parts(&upload, &content).await {
            Ok(parts) => {
                let count = parts.len();
                self.backend
                    .complete_multipart(&upload, &parts)
                    .await
                    .map(|()| count)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(count) => Ok(count),
            Err(err) => {
                error!(bucket, key, upload_id = %upload.upload_id, "multipart upload failed: {}", err);
                if let Err(abort_err) = self.backend.abort_multipart(&upload).await {
                    warn!(bucket, key, upload_id = %upload.upload_id, "abort failed: {}", abort_err);
                }
                Err(as_transfer_error(bucket, key, err))
            }
        }
    }

    async fn upload_parts(
        &self,
        upload: &MultipartUpload,
        content: &Bytes,
    ) -> ObjectResult<Vec<UploadedPart>> {
        let ranges = part_ranges(content.len(), self.transfer.part_size);
        let mut parts = Vec::with_capacity(ranges.len());
        for (idx, (offset, len)) in ranges.into_iter().enumerate() {
            let part_number = i32::try_from(idx + 1).map_err(|_| ObjectError::Transfer {
                bucket: upload.bucket.clone(),
                key: upload.key.clone(),
                message: "too many parts".into(),
            })?;
            let body = content.slice(offset..offset + len);
            parts.push(self.backend.upload_part(upload, part_number, body).await?);
        }
        Ok(parts)
    }

    /// Raw bytes of `key`.
    pub async fn get_object_bytes(&self, bucket: &str, key: &str) -> ObjectResult<Bytes> {
        ensure_key_safe(key)?;
        self.backend.get_object(bucket, key).await.map_err(|err| {
            error!(bucket, key, "download failed: {}", err);
            err
        })
    }

    /// Fetch `key`, decoding `.csv`, `.tsv` and `.parquet` payloads into a
    /// table. Other keys come back as raw bytes.
    pub async fn download_object(&self, bucket: &str, key: &str) -> ObjectResult<Download> {
        let payload = self.get_object_bytes(bucket, key).await?;
        match TabularFormat::from_key(key) {
            Some(format) => tabular::decode(format, payload)
                .map(Download::Table)
                .map_err(|err| {
                    warn!(bucket, key, "decode failed: {}", err);
                    ObjectError::Decode {
                        key: key.to_string(),
                        message: err.to_string(),
                    }
                }),
            None => Ok(Download::Raw(payload)),
        }
    }

    /// Delete `key`. A key that is already gone counts as deleted.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> ObjectResult<()> {
        ensure_key_safe(key)?;
        match self.backend.delete_object(bucket, key).await {
            Ok(()) | Err(ObjectError::ObjectNotFound { .. }) => {
                debug!(bucket, key, "object deleted");
                Ok(())
            }
            Err(err) => {
                error!(bucket, key, "delete object failed: {}", err);
                Err(err)
            }
        }
    }

    /// Delete every object in `bucket`, one key at a time.
    ///
    /// Stops at the first failed deletion and reports which keys were
    /// deleted and which remain.
    pub async fn empty_bucket(&self, bucket: &str) -> ObjectResult<EmptyReport> {
        let keys = self.list_objects(bucket, None, self.page_size).await?;
        let mut deleted = Vec::with_capacity(keys.len());

        for (idx, key) in keys.iter().enumerate() {
            if let Err(err) = self.delete_object(bucket, key).await {
                let remaining = keys[idx..].to_vec();
                error!(
                    bucket,
                    key = %key,
                    deleted = deleted.len(),
                    remaining = remaining.len(),
                    "emptying bucket stopped: {}",
                    err
                );
                return Err(ObjectError::PartialEmpty {
                    bucket: bucket.to_string(),
                    deleted,
                    remaining,
                    source: Box::new(err),
                });
            }
            deleted.push(key.clone());
        }

        info!(bucket, deleted = deleted.len(), "bucket emptied");
        Ok(EmptyReport {
            deleted,
            remaining: Vec::new(),
        })
    }

    /// Empty and then delete `bucket`.
    pub async fn delete_bucket(&self, bucket: &str) -> ObjectResult<EmptyReport> {
        if !self.bucket_exists(bucket).await? {
            return Err(ObjectError::BucketNotFound(bucket.to_string()));
        }
        let report = self.empty_bucket(bucket).await?;
        self.backend.delete_bucket(bucket).await.map_err(|err| {
            error!(bucket, "delete bucket failed: {}", err);
            err
        })?;
        info!(bucket, "bucket deleted");
        Ok(report)
    }

    /// Store a UTF-8 text object.
    pub async fn create_text_object(&self, bucket: &str, key: &str, text: &str) -> ObjectResult<()> {
        ensure_key_safe(key)?;
        self.backend
            .put_object(bucket, key, Bytes::copy_from_slice(text.as_bytes()))
            .await
            .map_err(|err| {
                error!(bucket, key, "text upload failed: {}", err);
                err
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_follow_s3_rules() {
        for good in ["abc", "my-bucket.2024", "a1b"] {
            assert!(ensure_bucket_name_safe(good).is_ok(), "rejected {good:?}");
        }
        for bad in ["ab", "UPPER", "-lead", "trail.", "a..b", "a-.b", "192.168.1.1", "has_underscore"] {
            assert!(
                matches!(ensure_bucket_name_safe(bad), Err(ObjectError::InvalidBucketName { .. })),
                "accepted {bad:?}"
            );
        }
        assert!(ensure_bucket_name_safe(&"a".repeat(64)).is_err());
    }

    #[test]
    fn keys_reject_empty_overlong_and_control_chars() {
        assert!(ensure_key_safe("reports/2024/q1.csv").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("a\nb").is_err());
        assert!(ensure_key_safe(&"k".repeat(1025)).is_err());
    }

    #[test]
    fn partial_empty_message_counts_progress() {
        let err = ObjectError::PartialEmpty {
            bucket: "b".into(),
            deleted: vec!["a".into()],
            remaining: vec!["b".into(), "c".into()],
            source: Box::new(ObjectError::Permission("denied".into())),
        };
        assert_eq!(
            err.to_string(),
            "emptying bucket `b` stopped after 1 of 3 objects: permission denied: denied"
        );
    }

    #[test]
    fn multipart_failures_become_transfer_errors() {
        let err = as_transfer_error(
            "b",
            "k",
            ObjectError::Backend {
                operation: "upload_part",
                message: "boom".into(),
            },
        );
        assert!(matches!(err, ObjectError::Transfer { .. }));
        assert!(matches!(
            as_transfer_error("b", "k", ObjectError::BucketNotFound("b".into())),
            ObjectError::BucketNotFound(_)
        ));
    }
}
