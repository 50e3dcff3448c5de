//! Row to record mapping.
//!
//! A [`Record`] describes its columns once through a [`RecordSchema`]; the
//! [`Mapper`] checks every scanned row against that schema and decodes the
//! values into the record, preserving row order.

#[macro_use]
mod macros;
pub mod nulls;
pub mod schema;

pub use nulls::{null_f64, null_i64, null_string, null_u64};
pub use schema::{FieldAccess, FieldDescriptor, RecordSchema, schema_of};

use crate::db::Executor;
use crate::error::{DbError, DbResult};
use crate::models::{FromSqlValue, Row, SqlValue};
use crate::query::Statement;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type rows can be mapped into. Usually implemented with [`record!`](crate::record).
pub trait Record: Sized + Send + 'static {
    /// Table and field layout. Called once per type; the result is cached.
    fn describe() -> RecordSchema;

    /// Build a record from the values of its selectable fields, in field order.
    fn from_values(values: Vec<SqlValue>) -> DbResult<Self>;

    /// Values of the insertable fields, in field order.
    fn insert_values(&self) -> Vec<SqlValue>;
}

/// Decode the next value of a row into a field of type `T`.
pub fn decode_next<T, I>(values: &mut I, column: &str) -> DbResult<T>
where
    T: FromSqlValue,
    I: Iterator<Item = SqlValue>,
{
    let value = values
        .next()
        .ok_or_else(|| DbError::mapping(format!("missing value for column '{}'", column)))?;
    T::from_sql_value(value).map_err(|e| DbError::mapping(format!("column '{}': {}", column, e)))
}

/// Maps result rows into `T`.
pub struct Mapper<T> {
    schema: Arc<RecordSchema>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Mapper<T> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            _record: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Mapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("table", &self.schema.table)
            .field("width", &self.schema.width())
            .finish()
    }
}

impl<T: Record> Default for Mapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Mapper<T> {
    pub fn new() -> Self {
        Self {
            schema: schema_of::<T>(),
            _record: PhantomData,
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Append one record per row to `out`.
    ///
    /// Stops at the first row whose width differs from the schema or whose
    /// values fail to decode. Records scanned before that row stay in `out`.
    pub fn scan(&self, rows: Vec<Row>, out: &mut Vec<T>) -> DbResult<()> {
        let width = self.schema.width();
        out.reserve(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(DbError::mapping(format!(
                    "row {} has {} columns but {} expects {} ({})",
                    index,
                    row.len(),
                    self.schema.table,
                    width,
                    self.schema.select_columns().join(", ")
                )));
            }
            let record = T::from_values(row.into_values()).map_err(|e| match e {
                DbError::Mapping { message } => {
                    DbError::mapping(format!("row {}: {}", index, message))
                }
                other => other,
            })?;
            out.push(record);
        }

        Ok(())
    }

    /// Run `sql` on `executor` and map every returned row.
    pub async fn query_into<E>(&self, executor: &mut E, sql: &str, args: &[SqlValue]) -> DbResult<Vec<T>>
    where
        E: Executor + ?Sized,
    {
        let rows = executor.fetch_all(sql, args).await?;
        let mut out = Vec::with_capacity(rows.len());
        self.scan(rows, &mut out)?;
        Ok(out)
    }

    /// Run a built statement and map every returned row.
    pub async fn fetch<E>(&self, executor: &mut E, statement: &Statement) -> DbResult<Vec<T>>
    where
        E: Executor + ?Sized,
    {
        self.query_into(executor, &statement.sql, &statement.args)
            .await
    }
}

/// Run `sql` on `executor` and map the rows into `T`.
pub async fn query_into<T, E>(executor: &mut E, sql: &str, args: &[SqlValue]) -> DbResult<Vec<T>>
where
    T: Record,
    E: Executor + ?Sized,
{
    Mapper::<T>::new().query_into(executor, sql, args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueKind;

    crate::record! {
        #[derive(Debug, Clone, PartialEq)]
        struct Item in "items" {
            id: i64 => "id" [read_only],
            label: String => "label",
            note: Option<String> => "note",
            token: String => "token" [write_only],
        }
    }

    crate::record! {
        #[derive(Debug)]
        struct Generated in "generated" {
            id: i64 => "id" [read_only],
            created: String => "created" [read_only],
        }
    }

    fn row(values: Vec<SqlValue>) -> Row {
        let columns = (0..values.len()).map(|i| format!("c{i}")).collect();
        Row::new(columns, values)
    }

    #[test]
    fn test_record_schema_from_macro() {
        let schema = Item::describe();
        assert_eq!(schema.table, "items");
        assert_eq!(schema.select_columns(), vec!["id", "label", "note"]);
        assert_eq!(schema.insert_columns(), vec!["label", "note", "token"]);
        assert_eq!(schema.fields[0].type_name, "i64");
        assert_eq!(schema.fields[3].access, FieldAccess::WriteOnly);
    }

    #[test]
    fn test_write_only_field_defaults_on_read() {
        let item = Item::from_values(vec![
            SqlValue::Int(1),
            SqlValue::Text("a".into()),
            SqlValue::Null(ValueKind::Text),
        ])
        .unwrap();
        assert_eq!(item.token, "");
        assert_eq!(item.note, None);
    }

    #[test]
    fn test_insert_values_skip_read_only() {
        let item = Item {
            id: 9,
            label: "a".into(),
            note: None,
            token: "t".into(),
        };
        assert_eq!(
            item.insert_values(),
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Null(ValueKind::Text),
                SqlValue::Text("t".into()),
            ]
        );
    }

    #[test]
    fn test_read_only_record_inserts_nothing() {
        let generated = Generated {
            id: 1,
            created: "now".into(),
        };
        assert!(generated.insert_values().is_empty());
        assert!(Generated::describe().insert_columns().is_empty());
    }

    #[test]
    fn test_scan_rejects_width_mismatch() {
        let mapper = Mapper::<Item>::new();
        let mut out = Vec::new();
        let err = mapper
            .scan(vec![row(vec![SqlValue::Int(1)])], &mut out)
            .unwrap_err();
        assert!(matches!(err, DbError::Mapping { .. }));
        assert!(err.to_string().contains("expects 3"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_decode_error_names_column() {
        let mapper = Mapper::<Item>::new();
        let mut out = Vec::new();
        let err = mapper
            .scan(
                vec![row(vec![
                    SqlValue::Text("not a number".into()),
                    SqlValue::Text("a".into()),
                    SqlValue::Null(ValueKind::Text),
                ])],
                &mut out,
            )
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("row 0"));
        assert!(text.contains("column 'id'"));
    }

    #[test]
    fn test_decode_next_missing_value() {
        let mut values = Vec::<SqlValue>::new().into_iter();
        let err = decode_next::<i64, _>(&mut values, "id").unwrap_err();
        assert!(err.to_string().contains("missing value for column 'id'"));
    }
}
