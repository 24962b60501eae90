//! Runs against a live PostgreSQL server named by
//! `DATA_FACADE_TEST_DATABASE_URL`; every test is a no-op without it.

use data_facade::models::table::{ColumnDef, Row, RowFilter, TableRef};
use data_facade::services::relational_store::{RelationalError, RelationalOptions, RelationalStore};
use serde_json::{Value, json};
use uuid::Uuid;

const DATABASE_URL_ENV: &str = "DATA_FACADE_TEST_DATABASE_URL";

async fn store() -> Option<RelationalStore> {
    let url = std::env::var(DATABASE_URL_ENV).ok()?;
    let options = RelationalOptions {
        max_connections: 4,
        ..RelationalOptions::default()
    };
    Some(
        RelationalStore::connect_url(&url, options)
            .await
            .expect("connect to test database"),
    )
}

fn unique_table(prefix: &str) -> TableRef {
    TableRef::new(format!("{}_{}", prefix, Uuid::new_v4().simple()))
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

async fn create_orders(store: &RelationalStore, table: &TableRef) {
    store
        .create_table(
            table,
            &[
                ColumnDef::new("id", "INT").not_null(),
                ColumnDef::new("qty", "INT"),
            ],
            &["id".to_string()],
        )
        .await
        .expect("create orders");
}

#[tokio::test]
async fn orders_scenario_upsert_read_delete() {
    let Some(store) = store().await else {
        eprintln!("skipping: {} not set", DATABASE_URL_ENV);
        return;
    };
    let table = unique_table("orders");
    create_orders(&store, &table).await;

    let rows = vec![row(json!({"id": 1, "qty": 5})), row(json!({"id": 2, "qty": 3}))];
    let conflict = ["id".to_string()];
    assert_eq!(store.upsert(&table, &rows, Some(&conflict)).await.expect("upsert"), 2);

    store
        .upsert(&table, &[row(json!({"id": 1, "qty": 9}))], Some(&conflict))
        .await
        .expect("overwrite");

    let read = store
        .query(&format!("SELECT id, qty FROM \"{}\" ORDER BY id", table.name))
        .await
        .expect("read");
    assert_eq!(read.column_names(), vec!["id", "qty"]);
    assert_eq!(
        serde_json::to_value(&read.rows).expect("rows"),
        json!([{"id": 1, "qty": 9}, {"id": 2, "qty": 3}])
    );

    let mut filter = RowFilter::new();
    filter.insert("id".into(), vec![json!(2)]);
    assert_eq!(store.delete(&table, Some(&filter)).await.expect("delete"), 1);

    let remaining = store.read(&table, None).await.expect("read remaining");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.rows[0].get("id"), Some(&json!(1)));

    store.delete(&table, None).await.expect("drop");
    assert!(!store.table_exists(&table).await.expect("exists"));
}

#[tokio::test]
async fn repeating_an_upsert_changes_nothing() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("idem");
    create_orders(&store, &table).await;

    let rows: Vec<Row> = (0..25).map(|i| row(json!({"id": i, "qty": i * 2}))).collect();
    let conflict = ["id".to_string()];
    store
        .upsert_batched(&table, &rows, Some(&conflict), 7)
        .await
        .expect("first upsert");
    let before = store.read(&table, None).await.expect("read before");
    store
        .upsert_batched(&table, &rows, Some(&conflict), 7)
        .await
        .expect("second upsert");
    let after = store.read(&table, None).await.expect("read after");

    assert_eq!(before.len(), 25);
    assert_eq!(after.len(), 25);
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn empty_table_reports_typed_columns() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("empty");
    create_orders(&store, &table).await;

    let read = store.read(&table, None).await.expect("read");
    assert!(read.is_empty());
    assert_eq!(read.column_names(), vec!["id", "qty"]);
    assert_eq!(read.columns[0].data_type, "INT4");
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn failing_batch_reports_committed_rows() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("abort");
    create_orders(&store, &table).await;

    let mut rows: Vec<Row> = (0..4).map(|i| row(json!({"id": i, "qty": 1}))).collect();
    rows.push(row(json!({"id": null, "qty": 1})));

    match store.upsert_batched(&table, &rows, None, 2).await {
        Err(RelationalError::UpsertAborted { committed_rows, .. }) => assert_eq!(committed_rows, 4),
        other => panic!("expected an aborted upsert, got {other:?}"),
    }
    assert_eq!(store.read(&table, None).await.expect("read").len(), 4);
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn creating_an_existing_table_is_a_schema_error() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("dup");
    create_orders(&store, &table).await;
    let again = store
        .create_table(&table, &[ColumnDef::new("id", "INT")], &["id".to_string()])
        .await;
    assert!(matches!(again, Err(RelationalError::Schema { .. })), "got {again:?}");
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn reading_a_missing_table_fails() {
    let Some(store) = store().await else {
        return;
    };
    let result = store.read(&unique_table("missing"), None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn in_batch_duplicates_resolve_to_the_last_row() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("dupkey");
    create_orders(&store, &table).await;

    let rows = vec![
        row(json!({"id": 1, "qty": 5})),
        row(json!({"id": 2, "qty": 3})),
        row(json!({"id": 1, "qty": 9})),
    ];
    let conflict = ["id".to_string()];
    store
        .upsert_batched(&table, &rows, Some(&conflict), 10)
        .await
        .expect("upsert with repeated key");

    let read = store
        .query(&format!("SELECT id, qty FROM \"{}\" ORDER BY id", table.name))
        .await
        .expect("read");
    assert_eq!(
        serde_json::to_value(&read.rows).expect("rows"),
        json!([{"id": 1, "qty": 9}, {"id": 2, "qty": 3}])
    );
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn filters_or_within_a_column_and_across_columns() {
    let Some(store) = store().await else {
        return;
    };
    let table = unique_table("regions");
    store
        .create_table(
            &table,
            &[
                ColumnDef::new("id", "INT").not_null(),
                ColumnDef::new("region", "TEXT"),
            ],
            &["id".to_string()],
        )
        .await
        .expect("create");
    let rows: Vec<Row> = [(1, "n"), (2, "s"), (3, "n"), (4, "e")]
        .iter()
        .map(|(id, region)| row(json!({"id": id, "region": region})))
        .collect();
    store.upsert(&table, &rows, None).await.expect("insert");

    let mut filter = RowFilter::new();
    filter.insert("id".into(), vec![json!(1), json!(2), json!(4)]);
    filter.insert(
        "region".into(),
        vec![json!("n"), json!("s"), json!("x' OR '1'='1")],
    );
    assert_eq!(store.delete(&table, Some(&filter)).await.expect("delete"), 2);

    let remaining = store
        .query(&format!("SELECT id FROM \"{}\" ORDER BY id", table.name))
        .await
        .expect("read");
    assert_eq!(
        serde_json::to_value(&remaining.rows).expect("rows"),
        json!([{"id": 3}, {"id": 4}])
    );
    store.delete(&table, None).await.expect("drop");
}

#[tokio::test]
async fn raw_queries_keep_columns_comments_and_precision() {
    let Some(store) = store().await else {
        return;
    };
    let duplicated = store.query("SELECT 1 AS id, 2 AS id").await;
    assert!(matches!(duplicated, Err(RelationalError::Query(_))), "got {duplicated:?}");

    let commented = store
        .query("SELECT 1 AS one -- trailing note")
        .await
        .expect("commented query");
    assert_eq!(commented.rows[0].get("one"), Some(&json!(1)));

    let numeric = store
        .query("SELECT 12345678901234567.89::numeric AS n")
        .await
        .expect("numeric query");
    assert_eq!(
        numeric.rows[0].get("n").map(Value::to_string).as_deref(),
        Some("12345678901234567.89")
    );
}
