//! Data models shared by the pool, the coordinator and the mapper.
//!
//! This module re-exports the value and row types used throughout the crate.

pub mod value;

// Re-export commonly used types
pub use value::{FromSqlValue, Row, SqlKind, SqlValue, ValueError, ValueKind};
