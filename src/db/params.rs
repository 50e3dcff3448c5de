//! Parameter binding utilities for PostgreSQL queries.

use crate::models::{SqlValue, ValueKind};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use uuid::Uuid;

pub(crate) type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Prepare `sql` with every argument bound positionally.
pub(crate) fn build_query<'q>(sql: &'q str, args: &'q [SqlValue]) -> PgQuery<'q> {
    args.iter()
        .fold(sqlx::query(sql), |query, arg| bind_postgres_param(query, arg))
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(query: PgQuery<'q>, param: &'q SqlValue) -> PgQuery<'q> {
    match param {
        SqlValue::Null(kind) => bind_null(query, *kind),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Json(v) => query.bind(Json(v)),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Date(v) => query.bind(*v),
    }
}

// A NULL declared as text is rejected by non-text columns, so NULLs carry their kind.
fn bind_null(query: PgQuery<'_>, kind: ValueKind) -> PgQuery<'_> {
    match kind {
        ValueKind::Bool => query.bind(None::<bool>),
        ValueKind::Int => query.bind(None::<i64>),
        ValueKind::Float => query.bind(None::<f64>),
        ValueKind::Bytes => query.bind(None::<Vec<u8>>),
        ValueKind::Json => query.bind(None::<Json<serde_json::Value>>),
        ValueKind::Uuid => query.bind(None::<Uuid>),
        ValueKind::Timestamp => query.bind(None::<DateTime<Utc>>),
        ValueKind::Date => query.bind(None::<NaiveDate>),
        ValueKind::Text | ValueKind::Unknown => query.bind(None::<String>),
    }
}
