//! Defines routes for the relational, document and object endpoints.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Relational** (`/database/sql`)
//!   - `POST /create` — create a table
//!   - `POST /upsert` — batched insert/update (`/update` is an alias)
//!   - `POST /read` — table scan or raw query
//!   - `POST /delete` — filtered delete, or drop with `drop: true`
//!
//! - **Documents** (`/database/nosql`)
//!   - `GET  /sequence` — next counter value
//!   - `POST /collection/update` — write a document
//!   - `POST /collection/document` — fetch documents by id
//!
//! - **Objects** (`/database/cos/bucket`)
//!   - `POST /create`, `/delete`, `/empty`, `/list_objects`
//!   - `GET  /list_buckets`
//!   - `POST /objects/upload_object` (multipart form), `/objects/retrieve_object`,
//!     `/objects/delete_object`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        nosql_handlers::{get_document, next_sequence, update_collection},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, empty_bucket, list_buckets, list_objects,
            retrieve_object, upload_object,
        },
        sql_handlers::{create_table, delete_rows, read_table, upsert_rows},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest accepted upload form.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Build and return the router for every endpoint.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/database/sql", sql_routes())
        .nest("/database/nosql", nosql_routes())
        .nest("/database/cos/bucket", object_routes())
}

fn sql_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_table))
        .route("/upsert", post(upsert_rows))
        .route("/update", post(upsert_rows))
        .route("/read", post(read_table))
        .route("/delete", post(delete_rows))
}

fn nosql_routes() -> Router<AppState> {
    Router::new()
        .route("/sequence", get(next_sequence))
        .route("/collection/update", post(update_collection))
        .route("/collection/document", post(get_document))
}

fn object_routes() -> Router<AppState> {
    Router::new()
        // Bucket-level routes
        .route("/create", post(create_bucket))
        .route("/delete", post(delete_bucket))
        .route("/empty", post(empty_bucket))
        .route("/list_objects", post(list_objects))
        .route("/list_buckets", get(list_buckets))
        // Object-level routes
        .route(
            "/objects/upload_object",
            post(upload_object).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/objects/retrieve_object", post(retrieve_object))
        .route("/objects/delete_object", post(delete_object))
}
