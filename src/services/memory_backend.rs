//! src/services/memory_backend.rs
//!
//! MemoryBackend keeps buckets and objects in process memory and follows
//! the S3 rules the store relies on: lexicographic listing with opaque
//! continuation tokens, staged multipart uploads that only become visible on
//! completion, and refusal to delete non-empty buckets. Faults can be
//! injected to exercise the store's failure paths.

use super::{
    object_backend::ObjectBackend,
    object_store::{ObjectError, ObjectResult},
};
use crate::models::{
    bucket::BucketInfo,
    multipart::{MultipartUpload, UploadedPart},
    object::ListPage,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const MAX_KEYS_PER_PAGE: usize = 1000;

struct MemoryBucket {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, Bytes>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
struct MemoryState {
    buckets: BTreeMap<String, MemoryBucket>,
    uploads: HashMap<String, PendingUpload>,
}

#[derive(Default)]
struct Faults {
    failing_deletes: HashSet<String>,
    failing_part: Option<i32>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    faults: Mutex<Faults>,
    list_calls: AtomicUsize,
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> ObjectResult<String> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ObjectError::Backend {
            operation: "list_objects_v2",
            message: format!("invalid continuation token `{}`", token),
        })
}

fn etag_of(body: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(body))
}

fn no_such_upload(upload: &MultipartUpload) -> ObjectError {
    ObjectError::Transfer {
        bucket: upload.bucket.clone(),
        key: upload.key.clone(),
        message: format!("no such upload `{}`", upload.upload_id),
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every deletion of `key` fail until cleared.
    pub async fn fail_deletes_of(&self, key: impl Into<String>) {
        self.faults.lock().await.failing_deletes.insert(key.into());
    }

    /// Make uploads of `part_number` fail until cleared.
    pub async fn fail_part(&self, part_number: i32) {
        self.faults.lock().await.failing_part = Some(part_number);
    }

    pub async fn clear_faults(&self) {
        *self.faults.lock().await = Faults::default();
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }

    /// Number of listing calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str, location: &str) -> ObjectResult<()> {
        let mut state = self.state.lock().await;
        if state.buckets.contains_key(bucket) {
            return Err(ObjectError::AlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        debug!(bucket, location, "memory bucket created");
        Ok(())
    }

    async fn list_buckets(&self) -> ObjectResult<Vec<BucketInfo>> {
        let state = self.state.lock().await;
        Ok(state
            .buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                created_at: Some(b.created_at),
            })
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool> {
        Ok(self.state.lock().await.buckets.contains_key(bucket))
    }

    async fn delete_bucket(&self, bucket: &str) -> ObjectResult<()> {
        let mut state = self.state.lock().await;
        match state.buckets.get(bucket) {
            None => Err(ObjectError::BucketNotFound(bucket.to_string())),
            Some(b) if !b.objects.is_empty() => Err(ObjectError::NotEmpty(bucket.to_string())),
            Some(_) => {
                state.buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> ObjectResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let start_after = match continuation_token.filter(|t| !t.is_empty()) {
            Some(token) => Some(decode_continuation_token(token)?),
            None => None,
        };

        let state = self.state.lock().await;
        let objects = &state
            .buckets
            .get(bucket)
            .ok_or_else(|| ObjectError::BucketNotFound(bucket.to_string()))?
            .objects;

        let max_keys = max_keys.clamp(1, MAX_KEYS_PER_PAGE);
        let fetch_limit = max_keys + 1;
        let prefix = prefix.unwrap_or("");
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| start_after.as_deref().is_none_or(|after| k.as_str() > after))
            .take(fetch_limit)
            .cloned()
            .collect();

        let is_truncated = keys.len() == fetch_limit;
        if is_truncated {
            keys.pop();
        }
        let next_continuation_token = if is_truncated {
            keys.last().map(|k| encode_continuation_token(k))
        } else {
            None
        };

        Ok(ListPage {
            keys,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectResult<()> {
        let mut state = self.state.lock().await;
        let target = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectError::BucketNotFound(bucket.to_string()))?;
        target.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectResult<Bytes> {
        let state = self.state.lock().await;
        let source = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ObjectError::BucketNotFound(bucket.to_string()))?;
        source
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectResult<()> {
        if self.faults.lock().await.failing_deletes.contains(key) {
            return Err(ObjectError::Backend {
                operation: "delete_object",
                message: format!("injected failure deleting `{}`", key),
            });
        }
        let mut state = self.state.lock().await;
        let target = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ObjectError::BucketNotFound(bucket.to_string()))?;
        target.objects.remove(key);
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> ObjectResult<MultipartUpload> {
        let mut state = self.state.lock().await;
        if !state.buckets.contains_key(bucket) {
            return Err(ObjectError::BucketNotFound(bucket.to_string()));
        }
        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> ObjectResult<UploadedPart> {
        if self.faults.lock().await.failing_part == Some(part_number) {
            return Err(ObjectError::Backend {
                operation: "upload_part",
                message: format!("injected failure on part {}", part_number),
            });
        }
        let mut state = self.state.lock().await;
        let pending = state
            .uploads
            .get_mut(&upload.upload_id)
            .ok_or_else(|| no_such_upload(upload))?;
        let etag = etag_of(&body);
        let size_bytes = body.len();
        pending.parts.insert(part_number, (etag.clone(), body));
        Ok(UploadedPart {
            part_number,
            etag,
            size_bytes,
        })
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[UploadedPart],
    ) -> ObjectResult<()> {
        let mut state = self.state.lock().await;
        let pending = state
            .uploads
            .remove(&upload.upload_id)
            .ok_or_else(|| no_such_upload(upload))?;

        let mut assembled = BytesMut::new();
        let mut previous = 0;
        for part in parts {
            let staged = pending
                .parts
                .get(&part.part_number)
                .filter(|(etag, _)| *etag == part.etag);
            match staged {
                Some((_, body)) if part.part_number > previous => {
                    assembled.extend_from_slice(body);
                    previous = part.part_number;
                }
                _ => {
                    return Err(ObjectError::Transfer {
                        bucket: pending.bucket,
                        key: pending.key,
                        message: format!("invalid part {} on completion", part.part_number),
                    });
                }
            }
        }

        let target = state
            .buckets
            .get_mut(&pending.bucket)
            .ok_or_else(|| ObjectError::BucketNotFound(pending.bucket.clone()))?;
        target.objects.insert(pending.key, assembled.freeze());
        Ok(())
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> ObjectResult<()> {
        self.state
            .lock()
            .await
            .uploads
            .remove(&upload.upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pages_follow_key_order() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b", "loc").await.expect("bucket");
        for key in ["c", "a", "b"] {
            backend
                .put_object("b", key, Bytes::from_static(b"x"))
                .await
                .expect("put");
        }

        let first = backend.list_page("b", None, None, 2).await.expect("page 1");
        assert_eq!(first.keys, vec!["a", "b"]);
        assert!(first.is_truncated);

        let token = first.next_continuation_token.expect("token");
        let second = backend
            .list_page("b", None, Some(&token), 2)
            .await
            .expect("page 2");
        assert_eq!(second.keys, vec!["c"]);
        assert!(!second.is_truncated);
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn rejects_deleting_non_empty_bucket() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b", "loc").await.expect("bucket");
        backend
            .put_object("b", "k", Bytes::from_static(b"x"))
            .await
            .expect("put");
        assert!(matches!(
            backend.delete_bucket("b").await,
            Err(ObjectError::NotEmpty(_))
        ));
        assert!(matches!(
            backend.create_bucket("b", "loc").await,
            Err(ObjectError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn staged_parts_stay_invisible_until_completion() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b", "loc").await.expect("bucket");
        let upload = backend.create_multipart("b", "big").await.expect("session");
        let p1 = backend
            .upload_part(&upload, 1, Bytes::from_static(b"hello "))
            .await
            .expect("part 1");
        let p2 = backend
            .upload_part(&upload, 2, Bytes::from_static(b"world"))
            .await
            .expect("part 2");

        assert!(backend.get_object("b", "big").await.is_err());
        backend
            .complete_multipart(&upload, &[p1, p2])
            .await
            .expect("complete");
        assert_eq!(
            backend.get_object("b", "big").await.expect("get"),
            Bytes::from_static(b"hello world")
        );
        assert_eq!(backend.pending_uploads().await, 0);
    }
}
