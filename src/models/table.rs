//! Relational entities: table references, column definitions, rows and
//! result sets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

/// A row is an ordered mapping from column name to scalar value.
///
/// The insertion order of the map is the column order used when the row is
/// written, so callers control it by the order they insert keys.
pub type Row = serde_json::Map<String, Value>;

/// Column → candidate values. Values of one column are OR'ed together,
/// different columns are AND'ed together.
pub type RowFilter = BTreeMap<String, Vec<Value>>;

/// A possibly schema-qualified table name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Parse `name` or `schema.name`.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((schema, name)) => Self::with_schema(schema, name),
            None => Self::new(raw),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One column of a table definition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,

    /// SQL type text, e.g. `INT`, `VARCHAR(64)`, `NUMERIC(10, 2)`.
    pub data_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Name and server-reported type of a result column.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// A tabular result set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_names() {
        assert_eq!(
            TableRef::parse("sales.orders"),
            TableRef::with_schema("sales", "orders")
        );
        assert_eq!(TableRef::parse("orders"), TableRef::new("orders"));
        assert_eq!(TableRef::parse("sales.orders").to_string(), "sales.orders");
    }

    #[test]
    fn column_defs_default_to_nullable() {
        let col: ColumnDef = serde_json::from_str(r#"{"name":"qty","data_type":"INT"}"#)
            .expect("deserialize column");
        assert!(col.nullable);
        assert!(!ColumnDef::new("id", "INT").not_null().nullable);
    }
}
