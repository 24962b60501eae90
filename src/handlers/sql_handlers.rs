//! HTTP handlers for the relational store.

use crate::{
    errors::AppError,
    models::table::{ColumnDef, Row, RowFilter, Table, TableRef},
    state::AppState,
};
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct CreateTableReq {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertReq {
    pub table_name: String,
    pub rows: Vec<Row>,
    /// Columns identifying an existing row; omitted means plain insert.
    pub conflict_columns: Option<Vec<String>>,
    pub batch_size: Option<usize>,
}

/// Either a table scan (`table_name`, optional `columns`) or a raw `query`.
#[derive(Debug, Deserialize)]
pub struct ReadReq {
    pub table_name: Option<String>,
    pub columns: Option<Vec<String>>,
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteReq {
    pub table_name: String,
    pub filter: Option<RowFilter>,
    /// Must be set to drop the whole table when no filter is given.
    #[serde(default)]
    pub drop: bool,
}

/// POST `/database/sql/create`
pub async fn create_table(
    State(state): State<AppState>,
    Json(req): Json<CreateTableReq>,
) -> Result<Json<Value>, AppError> {
    let table = TableRef::parse(&req.table_name);
    state
        .relational()?
        .create_table(&table, &req.columns, &req.primary_key)
        .await?;
    Ok(Json(json!({ "response": "table created" })))
}

/// POST `/database/sql/upsert`
pub async fn upsert_rows(
    State(state): State<AppState>,
    Json(req): Json<UpsertReq>,
) -> Result<Json<Value>, AppError> {
    let store = state.relational()?;
    let table = TableRef::parse(&req.table_name);
    let conflict = req.conflict_columns.as_deref();
    let rows = match req.batch_size {
        Some(batch_size) => store.upsert_batched(&table, &req.rows, conflict, batch_size).await?,
        None => store.upsert(&table, &req.rows, conflict).await?,
    };
    Ok(Json(json!({ "response": { "rows": rows } })))
}

/// POST `/database/sql/read`
pub async fn read_table(
    State(state): State<AppState>,
    Json(req): Json<ReadReq>,
) -> Result<Json<Table>, AppError> {
    let store = state.relational()?;
    let table = match (req.query, req.table_name) {
        (Some(query), None) => store.query(&query).await?,
        (None, Some(name)) => {
            store
                .read(&TableRef::parse(&name), req.columns.as_deref())
                .await?
        }
        _ => {
            return Err(AppError::bad_request(
                "provide exactly one of `table_name` or `query`",
            ));
        }
    };
    Ok(Json(table))
}

/// POST `/database/sql/delete`
pub async fn delete_rows(
    State(state): State<AppState>,
    Json(req): Json<DeleteReq>,
) -> Result<Json<Value>, AppError> {
    if req.filter.is_none() && !req.drop {
        return Err(AppError::bad_request(
            "a delete without `filter` drops the table; set `drop` to confirm",
        ));
    }
    let table = TableRef::parse(&req.table_name);
    let deleted = state
        .relational()?
        .delete(&table, req.filter.as_ref())
        .await?;
    let response = if req.filter.is_some() {
        json!({ "rows": deleted })
    } else {
        json!("table dropped")
    };
    Ok(Json(json!({ "response": response })))
}
