//! The ObjectBackend trait and its S3 implementation.
//!
//! The trait exposes the raw primitives of an S3-compatible service: one
//! listing page at a time, single puts, and the multipart session calls.
//! Pagination loops, multipart orchestration and bucket emptying live in
//! `ObjectStore`, so every backend gets them for free.

use super::object_store::{ObjectError, ObjectResult};
use crate::{
    credentials::CosCredentials,
    models::{
        bucket::BucketInfo,
        multipart::{MultipartUpload, UploadedPart},
        object::ListPage,
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    types::{BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Primitive operations of an S3-compatible object service.
///
/// Implementations must be `Send + Sync`; the store shares one backend
/// across concurrent requests.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn create_bucket(&self, bucket: &str, location: &str) -> ObjectResult<()>;

    async fn list_buckets(&self) -> ObjectResult<Vec<BucketInfo>>;

    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool>;

    /// Delete an empty bucket. A non-empty bucket is rejected with
    /// [`ObjectError::NotEmpty`].
    async fn delete_bucket(&self, bucket: &str) -> ObjectResult<()>;

    /// Fetch one page of up to `max_keys` keys, starting after
    /// `continuation_token` when given.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> ObjectResult<ListPage>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectResult<Bytes>;

    /// Delete one object. Deleting a missing key is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectResult<()>;

    async fn create_multipart(&self, bucket: &str, key: &str) -> ObjectResult<MultipartUpload>;

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> ObjectResult<UploadedPart>;

    /// Assemble `parts` into the object; only now does it become visible.
    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[UploadedPart],
    ) -> ObjectResult<()>;

    /// Discard every part staged under `upload`.
    async fn abort_multipart(&self, upload: &MultipartUpload) -> ObjectResult<()>;
}

/// Coarse class of an S3 error response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum S3ErrorClass {
    AlreadyExists,
    NoSuchBucket,
    NoSuchKey,
    NotFound,
    AccessDenied,
    NotEmpty,
    Other,
}

/// Classify an S3 error by its error code, falling back to the HTTP status
/// for responses without a body (HEAD requests).
pub fn classify_s3(code: Option<&str>, status: Option<u16>) -> S3ErrorClass {
    match code {
        Some("BucketAlreadyExists" | "BucketAlreadyOwnedByYou") => S3ErrorClass::AlreadyExists,
        Some("NoSuchBucket") => S3ErrorClass::NoSuchBucket,
        Some("NoSuchKey") => S3ErrorClass::NoSuchKey,
        Some("BucketNotEmpty") => S3ErrorClass::NotEmpty,
        Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            S3ErrorClass::AccessDenied
        }
        _ => match status {
            Some(404) => S3ErrorClass::NotFound,
            Some(401 | 403) => S3ErrorClass::AccessDenied,
            _ => S3ErrorClass::Other,
        },
    }
}

/// Convert an SDK error raised by `operation` on `bucket`/`key`.
fn map_sdk_error<E>(
    err: SdkError<E>,
    operation: &'static str,
    bucket: &str,
    key: Option<&str>,
) -> ObjectError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();

    match (classify_s3(code.as_deref(), status), key) {
        (S3ErrorClass::AlreadyExists, _) => ObjectError::AlreadyExists(bucket.to_string()),
        (S3ErrorClass::NoSuchBucket, _) | (S3ErrorClass::NotFound, None) => {
            ObjectError::BucketNotFound(bucket.to_string())
        }
        (S3ErrorClass::NoSuchKey | S3ErrorClass::NotFound, Some(key)) => ObjectError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        (S3ErrorClass::NoSuchKey, None) => ObjectError::Backend { operation, message },
        (S3ErrorClass::AccessDenied, _) => ObjectError::Permission(message),
        (S3ErrorClass::NotEmpty, _) => ObjectError::NotEmpty(bucket.to_string()),
        (S3ErrorClass::Other, _) => ObjectError::Backend { operation, message },
    }
}

/// Backend speaking the S3 API through the AWS SDK, using static HMAC
/// credentials, an explicit endpoint and path-style addressing.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    pub fn new(creds: &CosCredentials) -> Self {
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(creds.region.clone()))
            .credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                "service-binding",
            ))
            .force_path_style(true);
        if let Some(endpoint) = &creds.endpoint {
            config = config.endpoint_url(endpoint);
        }
        info!(
            endpoint = creds.endpoint.as_deref().unwrap_or("<sdk default>"),
            region = %creds.region,
            "configured S3 backend"
        );
        Self::from_client(Client::from_conf(config.build()))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn create_bucket(&self, bucket: &str, location: &str) -> ObjectResult<()> {
        let configuration = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(location))
            .build();
        self.client
            .create_bucket()
            .bucket(bucket)
            .create_bucket_configuration(configuration)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "create_bucket", bucket, None))?;
        Ok(())
    }

    async fn list_buckets(&self) -> ObjectResult<Vec<BucketInfo>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "list_buckets", "", None))?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| {
                b.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created_at: b
                        .creation_date()
                        .and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), d.subsec_nanos())),
                })
            })
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match map_sdk_error(err, "head_bucket", bucket, None) {
                ObjectError::BucketNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> ObjectResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "delete_bucket", bucket, None))?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> ObjectResult<ListPage> {
        let max_keys = i32::try_from(max_keys).unwrap_or(i32::MAX);
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.filter(|p| !p.is_empty()).map(str::to_owned))
            .set_continuation_token(continuation_token.filter(|t| !t.is_empty()).map(str::to_owned))
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "list_objects_v2", bucket, None))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_owned))
            .collect();
        Ok(ListPage {
            keys,
            is_truncated: output.is_truncated().unwrap_or(false),
            next_continuation_token: output.next_continuation_token().map(str::to_owned),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> ObjectResult<()> {
        let len = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "put_object", bucket, Some(key)))?;
        debug!(bucket, key, bytes = len, "object stored");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "get_object", bucket, Some(key)))?;
        let data = output.body.collect().await.map_err(|err| ObjectError::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: err.to_string(),
        })?;
        Ok(data.into_bytes())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "delete_object", bucket, Some(key)))?;
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> ObjectResult<MultipartUpload> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "create_multipart_upload", bucket, Some(key)))?;
        let upload_id = output.upload_id().ok_or_else(|| ObjectError::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: "backend returned no upload id".into(),
        })?;
        Ok(MultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> ObjectResult<UploadedPart> {
        let size_bytes = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "upload_part", &upload.bucket, Some(&upload.key)))?;
        let etag = output.e_tag().ok_or_else(|| ObjectError::Transfer {
            bucket: upload.bucket.clone(),
            key: upload.key.clone(),
            message: format!("part {} returned no etag", part_number),
        })?;
        Ok(UploadedPart {
            part_number,
            etag: etag.to_string(),
            size_bytes,
        })
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[UploadedPart],
    ) -> ObjectResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .e_tag(&p.etag)
                            .part_number(p.part_number)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, "complete_multipart_upload", &upload.bucket, Some(&upload.key))
            })?;
        Ok(())
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> ObjectResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|err| {
                map_sdk_error(err, "abort_multipart_upload", &upload.bucket, Some(&upload.key))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_take_precedence_over_status() {
        assert_eq!(classify_s3(Some("BucketAlreadyOwnedByYou"), Some(409)), S3ErrorClass::AlreadyExists);
        assert_eq!(classify_s3(Some("BucketNotEmpty"), Some(409)), S3ErrorClass::NotEmpty);
        assert_eq!(classify_s3(Some("NoSuchKey"), Some(404)), S3ErrorClass::NoSuchKey);
        assert_eq!(classify_s3(Some("AccessDenied"), Some(403)), S3ErrorClass::AccessDenied);
    }

    #[test]
    fn bodyless_responses_fall_back_to_status() {
        assert_eq!(classify_s3(None, Some(404)), S3ErrorClass::NotFound);
        assert_eq!(classify_s3(None, Some(403)), S3ErrorClass::AccessDenied);
        assert_eq!(classify_s3(None, Some(500)), S3ErrorClass::Other);
        assert_eq!(classify_s3(Some("SlowDown"), Some(503)), S3ErrorClass::Other);
    }
}
