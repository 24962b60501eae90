//! SQL statement builders for the relational store.
//!
//! Every identifier that reaches a statement goes through
//! [`quote_identifier`] after validation, and every value is bound as a
//! parameter. Values travel as one JSON parameter per batch or filter column
//! and are converted to the table's row type by PostgreSQL
//! (`jsonb_populate_recordset`), so a value always lands in the column whose
//! name it carries.

use super::relational_store::{RelationalError, RelationalResult};
use crate::models::table::{ColumnDef, TableRef};

const MAX_IDENTIFIER_LEN: usize = 63;
const MAX_TYPE_LEN: usize = 64;

/// Check that `name` is a plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> RelationalResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start
        || name.len() > MAX_IDENTIFIER_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(RelationalError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Double-quote a validated identifier.
pub fn quote_identifier(name: &str) -> RelationalResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Quoted, optionally schema-qualified table name.
pub fn qualified_name(table: &TableRef) -> RelationalResult<String> {
    let name = quote_identifier(&table.name)?;
    match &table.schema {
        Some(schema) => Ok(format!("{}.{}", quote_identifier(schema)?, name)),
        None => Ok(name),
    }
}

/// Column type text is placed into DDL verbatim, so only a conservative
/// character set is accepted: `VARCHAR(64)`, `NUMERIC(10, 2)`, `INT[]`,
/// `TIMESTAMP WITH TIME ZONE`.
pub fn validate_column_type(table: &TableRef, data_type: &str) -> RelationalResult<()> {
    let trimmed = data_type.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_TYPE_LEN
        && trimmed.starts_with(|c: char| c.is_ascii_alphabetic())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(RelationalError::Schema {
            table: table.to_string(),
            message: format!("invalid column type `{}`", data_type),
        })
    }
}

fn quoted_list<S: AsRef<str>>(names: &[S]) -> RelationalResult<String> {
    let quoted = names
        .iter()
        .map(|n| quote_identifier(n.as_ref()))
        .collect::<RelationalResult<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// `CREATE TABLE` with every column and a primary key constraint.
pub fn create_table_sql(
    table: &TableRef,
    columns: &[ColumnDef],
    primary_key: &[String],
) -> RelationalResult<String> {
    let schema_error = |message: String| RelationalError::Schema {
        table: table.to_string(),
        message,
    };
    if columns.is_empty() {
        return Err(schema_error("a table needs at least one column".into()));
    }
    if primary_key.is_empty() {
        return Err(schema_error("a table needs a primary key".into()));
    }
    if let Some(missing) = primary_key
        .iter()
        .find(|pk| !columns.iter().any(|c| &c.name == *pk))
    {
        return Err(schema_error(format!(
            "primary key column `{}` is not defined",
            missing
        )));
    }

    let mut defs = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        validate_column_type(table, &column.data_type)?;
        let mut def = format!(
            "{} {}",
            quote_identifier(&column.name)?,
            column.data_type.trim()
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        defs.push(def);
    }
    defs.push(format!("PRIMARY KEY ({})", quoted_list(primary_key)?));

    Ok(format!(
        "CREATE TABLE {} ({})",
        qualified_name(table)?,
        defs.join(", ")
    ))
}

/// Insert statement for one batch, bound to a single JSON array parameter.
///
/// With conflict columns every other column is overwritten from the incoming
/// row; when the conflict columns cover every column there is nothing to
/// update and conflicting rows are left untouched.
pub fn upsert_sql<S: AsRef<str>>(
    table: &TableRef,
    columns: &[S],
    conflict_columns: Option<&[String]>,
) -> RelationalResult<String> {
    let target = qualified_name(table)?;
    let column_list = quoted_list(columns)?;
    let selected = columns
        .iter()
        .map(|c| quote_identifier(c.as_ref()).map(|q| format!("r.{}", q)))
        .collect::<RelationalResult<Vec<_>>>()?
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {target} ({column_list}) SELECT {selected} \
         FROM jsonb_populate_recordset(NULL::{target}, $1::jsonb) AS r"
    );

    if let Some(conflict) = conflict_columns.filter(|c| !c.is_empty()) {
        let updates = columns
            .iter()
            .map(AsRef::as_ref)
            .filter(|c| !conflict.iter().any(|k| k.as_str() == *c))
            .map(|c| quote_identifier(c).map(|q| format!("{q} = EXCLUDED.{q}")))
            .collect::<RelationalResult<Vec<_>>>()?;
        sql.push_str(&format!(" ON CONFLICT ({})", quoted_list(conflict)?));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
    }

    Ok(sql)
}

/// Full scan, optionally restricted to `columns`.
pub fn select_sql(table: &TableRef, columns: Option<&[String]>) -> RelationalResult<String> {
    let projection = match columns {
        Some(cols) if !cols.is_empty() => quoted_list(cols)?,
        _ => "*".to_string(),
    };
    Ok(format!("SELECT {} FROM {}", projection, qualified_name(table)?))
}

/// Wrap a query so each row comes back as one JSON object whose keys keep
/// the query's column order.
///
/// The inner query sits on its own lines so a trailing `--` comment cannot
/// swallow the closing parenthesis.
pub fn json_rows_sql(query: &str) -> String {
    let inner = query.trim().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(q) FROM (\n{}\n) AS q", inner)
}

/// `DELETE` with one bound JSON parameter per filter column.
///
/// Parameter `$n` carries `[{"col": v1}, {"col": v2}, ...]` for the n-th
/// column; the candidate values are converted to the column's type by the
/// server and matched with `= ANY`, which ORs them. Columns are AND'ed.
pub fn delete_sql<S: AsRef<str>>(table: &TableRef, filter_columns: &[S]) -> RelationalResult<String> {
    let target = qualified_name(table)?;
    let clauses = filter_columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            quote_identifier(column.as_ref()).map(|q| {
                format!(
                    "{q} = ANY (SELECT r.{q} FROM jsonb_populate_recordset(NULL::{target}, ${}::jsonb) AS r)",
                    idx + 1
                )
            })
        })
        .collect::<RelationalResult<Vec<_>>>()?;
    Ok(format!("DELETE FROM {} WHERE {}", target, clauses.join(" AND ")))
}

pub fn drop_table_sql(table: &TableRef) -> RelationalResult<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", qualified_name(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableRef {
        TableRef::new("orders")
    }

    #[test]
    fn rejects_identifiers_that_could_escape_quoting() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("_tmp1").is_ok());
        for bad in ["", "1abc", "a-b", "a\"b", "x; DROP TABLE y", "a b"] {
            assert!(
                matches!(validate_identifier(bad), Err(RelationalError::InvalidIdentifier(_))),
                "accepted {bad:?}"
            );
        }
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn builds_composite_primary_key_ddl() {
        let sql = create_table_sql(
            &TableRef::with_schema("sales", "lines"),
            &[
                ColumnDef::new("order_id", "INT").not_null(),
                ColumnDef::new("line", "INT").not_null(),
                ColumnDef::new("price", "NUMERIC(10, 2)"),
            ],
            &["order_id".into(), "line".into()],
        )
        .expect("ddl");
        assert_eq!(
            sql,
            "CREATE TABLE \"sales\".\"lines\" (\"order_id\" INT NOT NULL, \"line\" INT NOT NULL, \
             \"price\" NUMERIC(10, 2), PRIMARY KEY (\"order_id\", \"line\"))"
        );
    }

    #[test]
    fn ddl_rejects_bad_types_and_unknown_keys() {
        let injected = create_table_sql(
            &orders(),
            &[ColumnDef::new("id", "INT); DROP TABLE x; --")],
            &["id".into()],
        );
        assert!(matches!(injected, Err(RelationalError::Schema { .. })));

        let missing_pk = create_table_sql(&orders(), &[ColumnDef::new("id", "INT")], &["qty".into()]);
        assert!(matches!(missing_pk, Err(RelationalError::Schema { .. })));

        let no_pk = create_table_sql(&orders(), &[ColumnDef::new("id", "INT")], &[]);
        assert!(matches!(no_pk, Err(RelationalError::Schema { .. })));
    }

    #[test]
    fn upsert_updates_every_non_conflict_column() {
        let sql = upsert_sql(&orders(), &["id", "qty", "note"], Some(&["id".to_string()]))
            .expect("upsert sql");
        assert_eq!(
            sql,
            "INSERT INTO \"orders\" (\"id\", \"qty\", \"note\") SELECT r.\"id\", r.\"qty\", r.\"note\" \
             FROM jsonb_populate_recordset(NULL::\"orders\", $1::jsonb) AS r \
             ON CONFLICT (\"id\") DO UPDATE SET \"qty\" = EXCLUDED.\"qty\", \"note\" = EXCLUDED.\"note\""
        );
    }

    #[test]
    fn upsert_without_updatable_columns_does_nothing_on_conflict() {
        let sql = upsert_sql(&orders(), &["id"], Some(&["id".to_string()])).expect("upsert sql");
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));

        let plain = upsert_sql(&orders(), &["id"], None).expect("insert sql");
        assert!(!plain.contains("ON CONFLICT"));
    }

    #[test]
    fn delete_ands_columns_and_binds_each_column_once() {
        let sql = delete_sql(&orders(), &["id", "region"]).expect("delete sql");
        assert_eq!(
            sql,
            "DELETE FROM \"orders\" WHERE \
             \"id\" = ANY (SELECT r.\"id\" FROM jsonb_populate_recordset(NULL::\"orders\", $1::jsonb) AS r) AND \
             \"region\" = ANY (SELECT r.\"region\" FROM jsonb_populate_recordset(NULL::\"orders\", $2::jsonb) AS r)"
        );
        assert!(delete_sql(&orders(), &["id' OR '1'='1"]).is_err());
    }

    #[test]
    fn select_and_row_wrapping() {
        assert_eq!(
            select_sql(&orders(), Some(&["id".to_string()])).expect("select"),
            "SELECT \"id\" FROM \"orders\""
        );
        assert_eq!(select_sql(&orders(), None).expect("select"), "SELECT * FROM \"orders\"");
        assert_eq!(
            json_rows_sql("SELECT 1 AS one; "),
            "SELECT row_to_json(q) FROM (\nSELECT 1 AS one\n) AS q"
        );
    }

    #[test]
    fn trailing_line_comment_stays_inside_the_wrapper() {
        let wrapped = json_rows_sql("SELECT 1 AS one -- trailing note");
        let last_line = wrapped.lines().last().expect("closing line");
        assert_eq!(last_line, ") AS q");
        assert!(wrapped.contains("\nSELECT 1 AS one -- trailing note\n"));
    }
}
