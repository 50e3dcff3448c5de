//! PostgreSQL type mappings.
//!
//! Result columns are decoded into [`SqlValue`] in two steps:
//! 1. `categorize_type` classifies the column's type name
//! 2. a category-specific decoder extracts the value
//!
//! Decode failures are surfaced as mapping errors, never replaced by NULL.

use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use uuid::Uuid;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Unknown,
}

impl TypeCategory {
    /// Kind used for a NULL in a column of this category.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::SmallInt | Self::Integer | Self::BigInt => ValueKind::Int,
            Self::Real | Self::Double => ValueKind::Float,
            Self::Boolean => ValueKind::Bool,
            Self::Decimal | Self::Text => ValueKind::Text,
            Self::Binary => ValueKind::Bytes,
            Self::Json => ValueKind::Json,
            Self::Uuid => ValueKind::Uuid,
            Self::Timestamp | Self::TimestampTz => ValueKind::Timestamp,
            Self::Date => ValueKind::Date,
            Self::Unknown => ValueKind::Unknown,
        }
    }
}

/// Classify a Postgres type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match normalize_type_name(type_name).as_str() {
        "smallint" => TypeCategory::SmallInt,
        "integer" => TypeCategory::Integer,
        "bigint" => TypeCategory::BigInt,
        "real" => TypeCategory::Real,
        "double" => TypeCategory::Double,
        "numeric" => TypeCategory::Decimal,
        "boolean" => TypeCategory::Boolean,
        "text" | "char" | "name" | "citext" => TypeCategory::Text,
        "binary" => TypeCategory::Binary,
        "json" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "date" => TypeCategory::Date,
        _ => TypeCategory::Unknown,
    }
}

/// Normalize a Postgres type name to a more consistent format.
pub fn normalize_type_name(type_name: &str) -> String {
    let lower = type_name.to_lowercase();

    match lower.as_str() {
        // Integers
        "int2" | "smallint" | "smallserial" => "smallint".to_string(),
        "int4" | "integer" | "int" | "serial" => "integer".to_string(),
        "int8" | "bigint" | "bigserial" => "bigint".to_string(),
        // Text
        "varchar" | "character varying" | "text" => "text".to_string(),
        "char" | "character" | "bpchar" => "char".to_string(),
        // Boolean
        "bool" | "boolean" => "boolean".to_string(),
        // Float
        "float4" | "real" => "real".to_string(),
        "float8" | "double precision" => "double".to_string(),
        "numeric" | "decimal" => "numeric".to_string(),
        // Binary
        "bytea" => "binary".to_string(),
        // Date/Time
        "timestamp" | "timestamp without time zone" => "timestamp".to_string(),
        "timestamptz" | "timestamp with time zone" => "timestamptz".to_string(),
        "date" => "date".to_string(),
        // JSON
        "json" | "jsonb" => "json".to_string(),
        // UUID
        "uuid" => "uuid".to_string(),
        // Default
        _ => lower,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation, including scale.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary NUMERIC wire format: base-10000 digit groups with a
/// weight (exponent of the first group) and a display scale.
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    if buf.len() < 8 {
        return Err("NUMERIC value shorter than its header".into());
    }
    let word = |i: usize| [buf[i], buf[i + 1]];

    let ndigits = usize::try_from(i16::from_be_bytes(word(0)))?;
    let weight = i32::from(i16::from_be_bytes(word(2)));
    let sign = u16::from_be_bytes(word(4));
    let dscale = usize::from(u16::from_be_bytes(word(6)));

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if buf.len() < 8 + ndigits * 2 {
        return Err("NUMERIC value shorter than its digit count".into());
    }

    let digits: Vec<i16> = (0..ndigits)
        .map(|i| i16::from_be_bytes(word(8 + i * 2)))
        .collect();
    let group = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Decode every column of a Postgres row.
pub fn decode_row(row: &PgRow) -> DbResult<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());

    for column in row.columns() {
        let idx = column.ordinal();
        let type_name = column.type_info().name();
        let category = categorize_type(type_name);

        let value = decode_column(row, idx, category).map_err(|e| {
            DbError::mapping(format!(
                "column '{}' ({}): {}",
                column.name(),
                type_name,
                e
            ))
        })?;

        columns.push(column.name().to_string());
        values.push(value);
    }

    Ok(Row::new(columns, values))
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Result<SqlValue, sqlx::Error> {
    let kind = category.value_kind();
    let value = match category {
        TypeCategory::SmallInt => get::<i16>(row, idx)?.map(SqlValue::from),
        TypeCategory::Integer => get::<i32>(row, idx)?.map(SqlValue::from),
        TypeCategory::BigInt => get::<i64>(row, idx)?.map(SqlValue::Int),
        TypeCategory::Real => get::<f32>(row, idx)?.map(SqlValue::from),
        TypeCategory::Double => get::<f64>(row, idx)?.map(SqlValue::Float),
        TypeCategory::Decimal => get::<RawDecimal>(row, idx)?.map(|v| SqlValue::Text(v.0)),
        TypeCategory::Boolean => get::<bool>(row, idx)?.map(SqlValue::Bool),
        TypeCategory::Binary => get::<Vec<u8>>(row, idx)?.map(SqlValue::Bytes),
        TypeCategory::Json => get::<serde_json::Value>(row, idx)?.map(SqlValue::Json),
        TypeCategory::Uuid => get::<Uuid>(row, idx)?.map(SqlValue::Uuid),
        TypeCategory::Timestamp => {
            get::<NaiveDateTime>(row, idx)?.map(|v| SqlValue::Timestamp(v.and_utc()))
        }
        TypeCategory::TimestampTz => get::<DateTime<Utc>>(row, idx)?.map(SqlValue::Timestamp),
        TypeCategory::Date => get::<NaiveDate>(row, idx)?.map(SqlValue::Date),
        TypeCategory::Text | TypeCategory::Unknown => get::<String>(row, idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null(kind)))
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx)
}
