//! HTTP handlers for bucket and object operations.
//! Storage concerns are delegated to `ObjectStore`; these handlers only
//! translate requests and responses.

use crate::{
    errors::AppError,
    models::object::Download,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct BucketReq {
    pub bucket_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub bucket_name: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListObjectsReq {
    pub bucket_name: String,
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectReq {
    pub bucket_name: String,
    pub key: String,
}

/// POST `/database/cos/bucket/create`
pub async fn create_bucket(
    State(state): State<AppState>,
    Json(req): Json<CreateBucketReq>,
) -> Result<Json<Value>, AppError> {
    state
        .objects()?
        .create_bucket(&req.bucket_name, req.location.as_deref())
        .await?;
    Ok(Json(json!({ "response": "bucket created" })))
}

/// GET `/database/cos/bucket/list_buckets`
pub async fn list_buckets(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let buckets = state.objects()?.list_buckets().await?;
    Ok(Json(json!({ "response": buckets })))
}

/// POST `/database/cos/bucket/list_objects`
pub async fn list_objects(
    State(state): State<AppState>,
    Json(req): Json<ListObjectsReq>,
) -> Result<Json<Value>, AppError> {
    let store = state.objects()?;
    let keys = store
        .list_objects(&req.bucket_name, req.prefix.as_deref(), store.page_size())
        .await?;
    Ok(Json(json!({ "response": keys })))
}

/// POST `/database/cos/bucket/empty`
pub async fn empty_bucket(
    State(state): State<AppState>,
    Json(req): Json<BucketReq>,
) -> Result<Json<Value>, AppError> {
    let report = state.objects()?.empty_bucket(&req.bucket_name).await?;
    Ok(Json(json!({ "response": report })))
}

/// POST `/database/cos/bucket/delete`
pub async fn delete_bucket(
    State(state): State<AppState>,
    Json(req): Json<BucketReq>,
) -> Result<Json<Value>, AppError> {
    let report = state.objects()?.delete_bucket(&req.bucket_name).await?;
    Ok(Json(json!({ "response": report })))
}

/// POST `/database/cos/bucket/objects/upload_object`
///
/// Multipart form with a `bucket_name` field and a `file` part. The key is
/// the optional `key` field, else the file name.
pub async fn upload_object(
    State(state): State<AppState>,
    mut form: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut bucket = None;
    let mut key = None;
    let mut file: Option<(Option<String>, Bytes)> = None;

    while let Some(field) = form.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("bucket_name") => bucket = Some(field.text().await?),
            Some("key") => key = Some(field.text().await?),
            Some("file") => {
                let file_name = field.file_name().map(str::to_owned);
                file = Some((file_name, field.bytes().await?));
            }
            other => debug!(field = ?other, "ignoring form field"),
        }
    }

    let bucket = bucket.ok_or_else(|| AppError::bad_request("missing `bucket_name` field"))?;
    let (file_name, content) = file.ok_or_else(|| AppError::bad_request("missing `file` part"))?;
    let key = key
        .or(file_name)
        .ok_or_else(|| AppError::bad_request("no `key` field and the file has no name"))?;

    let summary = state.objects()?.upload_object(&bucket, &key, content).await?;
    Ok(Json(json!({ "response": summary })))
}

/// POST `/database/cos/bucket/objects/retrieve_object`
///
/// Tabular keys answer with `{"response": {columns, rows}}`; anything else
/// is returned as raw bytes.
pub async fn retrieve_object(
    State(state): State<AppState>,
    Json(req): Json<ObjectReq>,
) -> Result<Response, AppError> {
    match state
        .objects()?
        .download_object(&req.bucket_name, &req.key)
        .await?
    {
        Download::Table(table) => Ok(Json(json!({ "response": table })).into_response()),
        Download::Raw(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            *response.status_mut() = StatusCode::OK;
            Ok(response)
        }
    }
}

/// POST `/database/cos/bucket/objects/delete_object`
pub async fn delete_object(
    State(state): State<AppState>,
    Json(req): Json<ObjectReq>,
) -> Result<Json<Value>, AppError> {
    state
        .objects()?
        .delete_object(&req.bucket_name, &req.key)
        .await?;
    Ok(Json(json!({ "response": "object deleted" })))
}
