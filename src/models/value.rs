//! Typed SQL values and result rows.
//!
//! [`SqlValue`] is used in both directions: as a bound query argument and as a
//! decoded result cell. A NULL keeps its [`ValueKind`] so it can be bound with
//! the right Postgres type instead of an untyped text NULL.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Logical type of a value, also used for typed NULLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueKind {
    #[default]
    Unknown,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Json,
    Uuid,
    Timestamp,
    Date,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Json => "json",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ValueKind),
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl SqlValue {
    /// An untyped NULL.
    pub const fn null() -> Self {
        Self::Null(ValueKind::Unknown)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null(kind) => *kind,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Json(_) => ValueKind::Json,
            Self::Uuid(_) => ValueKind::Uuid,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Date(_) => ValueKind::Date,
        }
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        if self.is_null() {
            "null"
        } else {
            self.kind().name()
        }
    }
}

/// Rust types with a fixed SQL kind, used to type NULLs produced from `None`.
pub trait SqlKind {
    const KIND: ValueKind;
}

macro_rules! impl_into_sql_value {
    ($($ty:ty => $kind:ident, |$v:ident| $conv:expr;)+) => {
        $(
            impl From<$ty> for SqlValue {
                fn from($v: $ty) -> Self {
                    $conv
                }
            }

            impl SqlKind for $ty {
                const KIND: ValueKind = ValueKind::$kind;
            }
        )+
    };
}

impl_into_sql_value! {
    bool => Bool, |v| SqlValue::Bool(v);
    i16 => Int, |v| SqlValue::Int(i64::from(v));
    i32 => Int, |v| SqlValue::Int(i64::from(v));
    i64 => Int, |v| SqlValue::Int(v);
    f32 => Float, |v| SqlValue::Float(f64::from(v));
    f64 => Float, |v| SqlValue::Float(v);
    String => Text, |v| SqlValue::Text(v);
    Vec<u8> => Bytes, |v| SqlValue::Bytes(v);
    serde_json::Value => Json, |v| SqlValue::Json(v);
    Uuid => Uuid, |v| SqlValue::Uuid(v);
    DateTime<Utc> => Timestamp, |v| SqlValue::Timestamp(v);
    NaiveDate => Date, |v| SqlValue::Date(v);
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue> + SqlKind,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null(T::KIND),
        }
    }
}

/// A value could not be converted to the requested Rust type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("expected {expected}, found {found}")]
pub struct ValueError {
    pub expected: &'static str,
    pub found: String,
}

impl ValueError {
    fn new(expected: &'static str, value: &SqlValue) -> Self {
        Self {
            expected,
            found: value.type_name().to_string(),
        }
    }

    fn out_of_range(expected: &'static str, value: impl fmt::Display) -> Self {
        Self {
            expected,
            found: format!("out-of-range value {value}"),
        }
    }
}

/// Conversion from a decoded cell into a record field.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError>;
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Null(_) => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Bool(v) => Ok(v),
            other => Err(ValueError::new("bool", &other)),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Int(v) => Ok(v),
            other => Err(ValueError::new("int", &other)),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        let v = i64::from_sql_value(value)?;
        i32::try_from(v).map_err(|_| ValueError::out_of_range("i32", v))
    }
}

impl FromSqlValue for i16 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        let v = i64::from_sql_value(value)?;
        i16::try_from(v).map_err(|_| ValueError::out_of_range("i16", v))
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        let v = i64::from_sql_value(value)?;
        u64::try_from(v).map_err(|_| ValueError::out_of_range("u64", v))
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Float(v) => Ok(v),
            // Integral columns widen losslessly up to 2^53
            SqlValue::Int(v) => Ok(v as f64),
            // NUMERIC arrives as exact text
            SqlValue::Text(v) => v.trim().parse::<f64>().map_err(|_| ValueError {
                expected: "float",
                found: format!("non-numeric text '{v}'"),
            }),
            other => Err(ValueError::new("float", &other)),
        }
    }
}

impl FromSqlValue for f32 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        f64::from_sql_value(value).map(|v| v as f32)
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Text(v) => Ok(v),
            other => Err(ValueError::new("text", &other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Bytes(v) => Ok(v),
            other => Err(ValueError::new("bytes", &other)),
        }
    }
}

impl FromSqlValue for serde_json::Value {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Json(v) => Ok(v),
            other => Err(ValueError::new("json", &other)),
        }
    }
}

impl FromSqlValue for Uuid {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Uuid(v) => Ok(v),
            SqlValue::Text(ref s) => Uuid::parse_str(s).map_err(|_| ValueError::new("uuid", &value)),
            other => Err(ValueError::new("uuid", &other)),
        }
    }
}

impl FromSqlValue for DateTime<Utc> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Timestamp(v) => Ok(v),
            other => Err(ValueError::new("timestamp", &other)),
        }
    }
}

impl FromSqlValue for NaiveDate {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Date(v) => Ok(v),
            other => Err(ValueError::new("date", &other)),
        }
    }
}

/// One result row: column names plus values in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row. Names and values are paired positionally.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Look up a value by column name (first match).
    pub fn get_by_name(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}
