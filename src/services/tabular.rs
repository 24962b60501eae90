//! Decoding of tabular object payloads (CSV, TSV, Parquet) into a [`Table`].

use crate::models::table::{ColumnInfo, Row, Table};
use arrow::{
    csv::{ReaderBuilder, reader::Format},
    datatypes::SchemaRef,
    error::ArrowError,
    json::{WriterBuilder, writer::JsonArray},
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{arrow::arrow_reader::ParquetRecordBatchReaderBuilder, errors::ParquetError};
use std::{io::Cursor, path::Path, sync::Arc};
use thiserror::Error;

/// Rows sampled to infer CSV column types.
const SCHEMA_INFERENCE_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum TabularError {
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error("row conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Tsv,
    Parquet,
}

impl TabularFormat {
    /// Format implied by the key's extension, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        let ext = Path::new(key).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

pub fn decode(format: TabularFormat, payload: Bytes) -> Result<Table, TabularError> {
    let (schema, batches) = match format {
        TabularFormat::Csv => read_delimited(payload, b',')?,
        TabularFormat::Tsv => read_delimited(payload, b'\t')?,
        TabularFormat::Parquet => read_parquet(payload)?,
    };
    to_table(&schema, &batches)
}

/// Header row names the columns; types are inferred from a sample of rows.
fn read_delimited(payload: Bytes, delimiter: u8) -> Result<(SchemaRef, Vec<RecordBatch>), TabularError> {
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format.infer_schema(Cursor::new(&payload[..]), Some(SCHEMA_INFERENCE_ROWS))?;
    let schema = Arc::new(schema);

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_delimiter(delimiter)
        .build(Cursor::new(payload))?;
    let batches = reader.collect::<Result<Vec<_>, ArrowError>>()?;
    Ok((schema, batches))
}

fn read_parquet(payload: Bytes) -> Result<(SchemaRef, Vec<RecordBatch>), TabularError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(payload)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, ArrowError>>()?;
    Ok((schema, batches))
}

fn to_table(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<Table, TabularError> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| ColumnInfo {
            name: f.name().clone(),
            data_type: f.data_type().to_string(),
        })
        .collect();

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs)?;
    writer.finish()?;
    let buf = writer.into_inner();

    let rows: Vec<Row> = if buf.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&buf)?
    };
    Ok(Table { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use parquet::arrow::ArrowWriter;
    use serde_json::json;

    #[test]
    fn formats_follow_extension() {
        assert_eq!(TabularFormat::from_key("reports/q1.CSV"), Some(TabularFormat::Csv));
        assert_eq!(TabularFormat::from_key("a.tsv"), Some(TabularFormat::Tsv));
        assert_eq!(TabularFormat::from_key("x/y.parquet"), Some(TabularFormat::Parquet));
        assert_eq!(TabularFormat::from_key("notes.txt"), None);
        assert_eq!(TabularFormat::from_key("sheets/q1.xlsx"), None);
        assert_eq!(TabularFormat::from_key("csv"), None);
    }

    #[test]
    fn csv_columns_keep_header_order_and_inferred_types() {
        let table = decode(TabularFormat::Csv, Bytes::from_static(b"id,qty,note\n1,5,a\n2,,b\n"))
            .expect("decode csv");
        assert_eq!(table.column_names(), vec!["id", "qty", "note"]);
        assert_eq!(table.columns[0].data_type, "Int64");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(serde_json::Value::Object(table.rows[0].clone()), json!({"id": 1, "qty": 5, "note": "a"}));
        assert_eq!(table.rows[1].get("qty"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let table = decode(TabularFormat::Tsv, Bytes::from_static(b"k\tv\nx\t1\n")).expect("decode tsv");
        assert_eq!(table.column_names(), vec!["k", "v"]);
        assert_eq!(table.rows[0].get("k"), Some(&json!("x")));
    }

    #[test]
    fn parquet_decodes_typed_columns() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .expect("batch");

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).expect("writer");
        writer.write(&batch).expect("write");
        writer.close().expect("close");

        let table = decode(TabularFormat::Parquet, Bytes::from(buf)).expect("decode parquet");
        assert_eq!(table.column_names(), vec!["id", "name"]);
        assert_eq!(table.columns[1].data_type, "Utf8");
        assert_eq!(table.rows[0].get("name"), Some(&json!("a")));
        assert_eq!(table.rows[1].get("name"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn garbage_parquet_is_an_error() {
        assert!(decode(TabularFormat::Parquet, Bytes::from_static(b"not parquet")).is_err());
    }
}
