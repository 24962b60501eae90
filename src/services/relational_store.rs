//! src/services/relational_store.rs
//!
//! RelationalStore: table lifecycle and row-level upsert/read/delete against
//! a bounded PostgreSQL pool. Statements are built in `sql`; this file owns
//! connection handling, batching and error classification.

use super::sql;
use crate::{
    credentials::PostgresCredentials,
    models::table::{ColumnDef, ColumnInfo, Row, RowFilter, Table, TableRef},
};
use serde_json::Value;
use sqlx::{
    Column, Executor, PgPool, Postgres, Statement, TypeInfo,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    types::Json,
};
use std::{collections::HashSet, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RelationalError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("schema error on `{table}`: {message}")]
    Schema { table: String, message: String },
    #[error("constraint violation on `{table}`: {message}")]
    ConstraintViolation { table: String, message: String },
    #[error("query error: {0}")]
    Query(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("upsert into `{table}` aborted after {committed_rows} committed rows: {source}")]
    UpsertAborted {
        table: String,
        committed_rows: usize,
        #[source]
        source: Box<RelationalError>,
    },
}

pub type RelationalResult<T> = Result<T, RelationalError>;

/// Which kind of statement failed; decides how a server error is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Ddl,
    Write,
    Read,
}

/// Error kind for a SQLSTATE code in the context of `kind`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Connection,
    Schema,
    Constraint,
    Query,
}

/// Map a SQLSTATE code to an error class.
///
/// Class 08 is always a connection problem. DDL failures are schema errors.
/// On writes, integrity (23) and data (22) exceptions are constraint
/// violations and undefined/duplicate objects (42) are schema errors.
pub fn classify_sqlstate(code: Option<&str>, kind: StatementKind) -> ErrorClass {
    let class = code.map(|c| c.get(..2).unwrap_or(c));
    match (class, kind) {
        (Some("08"), _) => ErrorClass::Connection,
        (_, StatementKind::Ddl) => ErrorClass::Schema,
        (Some("22" | "23"), StatementKind::Write) => ErrorClass::Constraint,
        (Some("42"), StatementKind::Write) => ErrorClass::Schema,
        (_, StatementKind::Write) => ErrorClass::Constraint,
        (_, StatementKind::Read) => ErrorClass::Query,
    }
}

/// Convert a driver error raised while running a `kind` statement on `target`.
fn classify(err: sqlx::Error, kind: StatementKind, target: &str) -> RelationalError {
    let class = match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => ErrorClass::Connection,
        sqlx::Error::Database(db_err) => classify_sqlstate(db_err.code().as_deref(), kind),
        _ => ErrorClass::Query,
    };
    let message = err.to_string();
    match class {
        ErrorClass::Connection => RelationalError::Connection(message),
        ErrorClass::Schema => RelationalError::Schema {
            table: target.to_string(),
            message,
        },
        ErrorClass::Constraint => RelationalError::ConstraintViolation {
            table: target.to_string(),
            message,
        },
        ErrorClass::Query => RelationalError::Query(message),
    }
}

/// Pool and batching settings.
#[derive(Clone, Debug)]
pub struct RelationalOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub batch_size: usize,
}

impl Default for RelationalOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// RelationalStore exposes table lifecycle and row operations over a pooled
/// PostgreSQL connection.
///
/// Every operation acquires one connection as a `PoolConnection` guard, so
/// the connection goes back to the pool on every exit path. Pool exhaustion
/// past `acquire_timeout` surfaces as [`RelationalError::Connection`].
#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
    batch_size: usize,
}

impl RelationalStore {
    /// Open a pool from bound credentials.
    pub async fn connect(
        creds: &PostgresCredentials,
        options: RelationalOptions,
    ) -> RelationalResult<Self> {
        let mut connect = PgConnectOptions::new()
            .host(&creds.host)
            .port(creds.port)
            .username(&creds.username)
            .password(&creds.password)
            .database(&creds.database);
        if let Some(ca) = &creds.ca_cert_path {
            connect = connect.ssl_mode(PgSslMode::VerifyCa).ssl_root_cert(ca);
        }

        info!(
            host = %creds.host,
            port = creds.port,
            database = %creds.database,
            max_connections = options.max_connections,
            "connecting relational store"
        );
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect)
            .await
            .map_err(|err| RelationalError::Connection(err.to_string()))?;

        Ok(Self::from_pool(pool, options.batch_size))
    }

    /// Open a pool from a `postgres://` URL.
    pub async fn connect_url(url: &str, options: RelationalOptions) -> RelationalResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(url)
            .await
            .map_err(|err| RelationalError::Connection(err.to_string()))?;
        Ok(Self::from_pool(pool, options.batch_size))
    }

    pub fn from_pool(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("relational store closed");
    }

    pub async fn ping(&self) -> RelationalResult<()> {
        let mut conn = self.acquire().await?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut *conn)
            .await
            .map_err(|err| classify(err, StatementKind::Read, "ping"))?;
        Ok(())
    }

    async fn acquire(&self) -> RelationalResult<PoolConnection<Postgres>> {
        self.pool.acquire().await.map_err(|err| {
            warn!("failed to acquire pooled connection: {}", err);
            RelationalError::Connection(err.to_string())
        })
    }

    /// Create `table` with `columns` and a primary key over `primary_key`.
    ///
    /// Fails with `Schema` if the table exists or a column definition is
    /// invalid.
    pub async fn create_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: &[String],
    ) -> RelationalResult<()> {
        let ddl = sql::create_table_sql(table, columns, primary_key)?;
        let mut conn = self.acquire().await?;
        debug!(%table, "executing DDL: {}", ddl);
        sqlx::query(&ddl)
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                error!(%table, "create table failed: {}", err);
                classify(err, StatementKind::Ddl, &table.to_string())
            })?;
        info!(%table, columns = columns.len(), "table created");
        Ok(())
    }

    /// Upsert `rows` using the store's configured batch size.
    pub async fn upsert(
        &self,
        table: &TableRef,
        rows: &[Row],
        conflict_columns: Option<&[String]>,
    ) -> RelationalResult<usize> {
        self.upsert_batched(table, rows, conflict_columns, self.batch_size)
            .await
    }

    /// Insert `rows` in batches of `batch_size`, overwriting rows that collide
    /// on `conflict_columns` when given. Within one batch the last row for a
    /// conflict key wins.
    ///
    /// Batches run sequentially, one statement each. The first failing batch
    /// stops the loop; the error is [`RelationalError::UpsertAborted`] and
    /// carries how many rows the earlier batches committed. Returns the number
    /// of rows written.
    pub async fn upsert_batched(
        &self,
        table: &TableRef,
        rows: &[Row],
        conflict_columns: Option<&[String]>,
        batch_size: usize,
    ) -> RelationalResult<usize> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<&str> = first.keys().map(String::as_str).collect();
        check_uniform_columns(table, &columns, rows)?;
        if let Some(conflict) = conflict_columns {
            if let Some(missing) = conflict.iter().find(|c| !columns.contains(&c.as_str())) {
                return Err(RelationalError::Query(format!(
                    "conflict column `{}` is not present in the rows",
                    missing
                )));
            }
        }

        let statement = sql::upsert_sql(table, &columns, conflict_columns)?;
        let batch_size = batch_size.max(1);
        let mut conn = self.acquire().await?;
        let mut committed = 0usize;

        for (batch_no, batch) in rows.chunks(batch_size).enumerate() {
            let unique = match conflict_columns {
                Some(conflict) => last_per_conflict_key(batch, conflict),
                None => batch.iter().collect(),
            };
            let payload = Value::Array(unique.into_iter().cloned().map(Value::Object).collect());
            let outcome = sqlx::query(&statement)
                .bind(Json(payload))
                .execute(&mut *conn)
                .await;

            match outcome {
                Ok(done) => {
                    committed += batch.len();
                    debug!(
                        %table,
                        batch = batch_no,
                        rows_affected = done.rows_affected(),
                        "upsert batch committed"
                    );
                }
                Err(err) => {
                    error!(
                        %table,
                        batch = batch_no,
                        committed,
                        "upsert batch failed: {}",
                        err
                    );
                    return Err(RelationalError::UpsertAborted {
                        table: table.to_string(),
                        committed_rows: committed,
                        source: Box::new(classify(err, StatementKind::Write, &table.to_string())),
                    });
                }
            }
        }

        info!(%table, rows = committed, "upsert complete");
        Ok(committed)
    }

    /// Read `table`, restricted to `columns` when given. No implicit limit.
    pub async fn read(
        &self,
        table: &TableRef,
        columns: Option<&[String]>,
    ) -> RelationalResult<Table> {
        let statement = sql::select_sql(table, columns)?;
        self.fetch_table(&statement).await
    }

    /// Run an arbitrary query and return its result set.
    pub async fn query(&self, raw: &str) -> RelationalResult<Table> {
        if raw.trim().is_empty() {
            return Err(RelationalError::Query("empty query".into()));
        }
        self.fetch_table(raw).await
    }

    async fn fetch_table(&self, query: &str) -> RelationalResult<Table> {
        let mut conn = self.acquire().await?;

        // Column metadata comes from the prepared statement so that an empty
        // result still reports its columns and types.
        let prepared = (&mut *conn).prepare(query).await.map_err(|err| {
            error!("prepare failed for `{}`: {}", query, err);
            classify(err, StatementKind::Read, query)
        })?;
        let columns: Vec<ColumnInfo> = prepared
            .columns()
            .iter()
            .map(|c| ColumnInfo {
                name: c.name().to_string(),
                data_type: c.type_info().name().to_string(),
            })
            .collect();
        check_distinct_columns(&columns)?;

        let values: Vec<Value> = sqlx::query_scalar(&sql::json_rows_sql(query))
            .fetch_all(&mut *conn)
            .await
            .map_err(|err| {
                error!("read failed for `{}`: {}", query, err);
                classify(err, StatementKind::Read, query)
            })?;

        let rows = values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(RelationalError::Query(format!(
                    "unexpected row shape: {}",
                    other
                ))),
            })
            .collect::<RelationalResult<Vec<Row>>>()?;

        debug!(rows = rows.len(), columns = columns.len(), "query returned");
        Ok(Table { columns, rows })
    }

    /// Delete rows matching `filter`, or drop the table when there is none.
    ///
    /// Returns the number of rows deleted (0 for a drop).
    pub async fn delete(
        &self,
        table: &TableRef,
        filter: Option<&RowFilter>,
    ) -> RelationalResult<u64> {
        let Some(filter) = filter else {
            let statement = sql::drop_table_sql(table)?;
            let mut conn = self.acquire().await?;
            sqlx::query(&statement)
                .execute(&mut *conn)
                .await
                .map_err(|err| {
                    error!(%table, "drop table failed: {}", err);
                    classify(err, StatementKind::Ddl, &table.to_string())
                })?;
            warn!(%table, "table dropped");
            return Ok(0);
        };

        if filter.is_empty() {
            return Err(RelationalError::Query(
                "delete filter must name at least one column".into(),
            ));
        }
        if let Some((column, _)) = filter.iter().find(|(_, values)| values.is_empty()) {
            return Err(RelationalError::Query(format!(
                "delete filter column `{}` has no values",
                column
            )));
        }

        let columns: Vec<&str> = filter.keys().map(String::as_str).collect();
        let statement = sql::delete_sql(table, &columns)?;
        let mut query = sqlx::query(&statement);
        for (column, values) in filter {
            query = query.bind(Json(filter_payload(column, values)));
        }

        let mut conn = self.acquire().await?;
        let done = query.execute(&mut *conn).await.map_err(|err| {
            error!(%table, "delete failed: {}", err);
            classify(err, StatementKind::Write, &table.to_string())
        })?;
        info!(%table, rows = done.rows_affected(), "rows deleted");
        Ok(done.rows_affected())
    }

    pub async fn table_exists(&self, table: &TableRef) -> RelationalResult<bool> {
        let name = sql::qualified_name(table)?;
        let mut conn = self.acquire().await?;
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .map_err(|err| classify(err, StatementKind::Read, &table.to_string()))
    }
}

/// Every row must carry exactly the first row's columns.
fn check_uniform_columns(table: &TableRef, columns: &[&str], rows: &[Row]) -> RelationalResult<()> {
    let expected: HashSet<&str> = columns.iter().copied().collect();
    for (idx, row) in rows.iter().enumerate() {
        let same = row.len() == expected.len() && row.keys().all(|k| expected.contains(k.as_str()));
        if !same {
            return Err(RelationalError::ConstraintViolation {
                table: table.to_string(),
                message: format!(
                    "row {} has columns [{}], expected [{}]",
                    idx,
                    row.keys().cloned().collect::<Vec<_>>().join(", "),
                    columns.join(", ")
                ),
            });
        }
    }
    Ok(())
}

/// Result rows are keyed by column name, so two columns with one name would
/// collapse into a single value.
fn check_distinct_columns(columns: &[ColumnInfo]) -> RelationalResult<()> {
    let mut seen = HashSet::new();
    match columns.iter().find(|c| !seen.insert(c.name.as_str())) {
        Some(dup) => Err(RelationalError::Query(format!(
            "result column `{}` appears more than once; alias it",
            dup.name
        ))),
        None => Ok(()),
    }
}

/// Keep only the last row for each conflict key, in the order those rows
/// appear. One statement cannot update the same row twice.
fn last_per_conflict_key<'a>(batch: &'a [Row], conflict: &[String]) -> Vec<&'a Row> {
    let mut seen = HashSet::new();
    let mut kept: Vec<&Row> = batch
        .iter()
        .rev()
        .filter(|row| {
            let key: Vec<String> = conflict
                .iter()
                .map(|c| row.get(c).map(Value::to_string).unwrap_or_default())
                .collect();
            seen.insert(key)
        })
        .collect();
    kept.reverse();
    kept
}

fn filter_payload(column: &str, values: &[Value]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|v| {
                let mut entry = serde_json::Map::new();
                entry.insert(column.to_string(), v.clone());
                Value::Object(entry)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn sqlstate_classes_map_to_error_kinds() {
        use ErrorClass::*;
        use StatementKind::*;
        assert_eq!(classify_sqlstate(Some("42P07"), Ddl), Schema);
        assert_eq!(classify_sqlstate(Some("42601"), Ddl), Schema);
        assert_eq!(classify_sqlstate(Some("23505"), Write), Constraint);
        assert_eq!(classify_sqlstate(Some("22P02"), Write), Constraint);
        assert_eq!(classify_sqlstate(Some("42P01"), Write), Schema);
        assert_eq!(classify_sqlstate(Some("42P01"), Read), Query);
        assert_eq!(classify_sqlstate(Some("08006"), Read), Connection);
        assert_eq!(classify_sqlstate(None, Read), Query);
    }

    #[test]
    fn rows_must_share_one_column_set() {
        let table = TableRef::new("orders");
        let rows = vec![
            row(json!({"id": 1, "qty": 5})),
            row(json!({"qty": 7, "id": 2})),
        ];
        assert!(check_uniform_columns(&table, &["id", "qty"], &rows).is_ok());

        let ragged = vec![row(json!({"id": 1, "qty": 5})), row(json!({"id": 2}))];
        let err = check_uniform_columns(&table, &["id", "qty"], &ragged).expect_err("ragged rows");
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn row_column_order_follows_insertion() {
        let r = row(json!({"qty": 9, "id": 1}));
        let columns: Vec<&str> = r.keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["qty", "id"]);
    }

    #[test]
    fn filter_payload_wraps_each_candidate() {
        let payload = filter_payload("id", &[json!(1), json!(2)]);
        assert_eq!(payload, json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn duplicate_result_column_names_are_rejected() {
        let columns = vec![
            ColumnInfo {
                name: "id".into(),
                data_type: "INT4".into(),
            },
            ColumnInfo {
                name: "id".into(),
                data_type: "INT4".into(),
            },
        ];
        assert!(matches!(
            check_distinct_columns(&columns),
            Err(RelationalError::Query(_))
        ));
        assert!(check_distinct_columns(&columns[..1]).is_ok());
    }

    #[test]
    fn last_row_per_conflict_key_wins_within_a_batch() {
        let batch = vec![
            row(json!({"id": 1, "qty": 5})),
            row(json!({"id": 2, "qty": 3})),
            row(json!({"id": 1, "qty": 9})),
        ];
        let kept = last_per_conflict_key(&batch, &["id".to_string()]);
        let kept: Vec<Value> = kept.into_iter().cloned().map(Value::Object).collect();
        assert_eq!(kept, vec![json!({"id": 2, "qty": 3}), json!({"id": 1, "qty": 9})]);

        let composite = vec![
            row(json!({"a": 1, "b": "x", "v": 1})),
            row(json!({"a": 1, "b": "y", "v": 2})),
        ];
        assert_eq!(
            last_per_conflict_key(&composite, &["a".to_string(), "b".to_string()]).len(),
            2
        );
    }

    #[test]
    fn large_numerics_keep_every_digit() {
        let n: Value = serde_json::from_str("12345678901234567.89").expect("numeric");
        assert_eq!(n.to_string(), "12345678901234567.89");
    }

    #[test]
    fn aborted_upsert_reports_committed_rows() {
        let err = RelationalError::UpsertAborted {
            table: "orders".into(),
            committed_rows: 2000,
            source: Box::new(RelationalError::ConstraintViolation {
                table: "orders".into(),
                message: "duplicate key".into(),
            }),
        };
        assert!(err.to_string().contains("after 2000 committed rows"));
    }
}
