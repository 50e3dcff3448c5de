//! Record schemas and their per-type cache.

use crate::mapper::Record;
use dashmap::DashMap;
use serde::Serialize;
use std::any::TypeId;
use std::sync::{Arc, LazyLock};

/// How a field takes part in reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    /// Selected and inserted.
    #[default]
    ReadWrite,
    /// Selected, never inserted (identity or generated columns).
    ReadOnly,
    /// Inserted, never selected.
    WriteOnly,
}

impl FieldAccess {
    pub fn is_selectable(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    pub fn is_insertable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// One record field and the column it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub field: &'static str,
    pub column: &'static str,
    /// Rust type as written in the record declaration.
    pub type_name: &'static str,
    pub access: FieldAccess,
}

/// Table name plus the ordered field list of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSchema {
    pub table: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl RecordSchema {
    pub fn new(table: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self { table, fields }
    }

    /// Columns a query must return, in field order.
    pub fn select_columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.access.is_selectable())
            .map(|f| f.column)
            .collect()
    }

    /// Columns written by an insert, in field order.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.access.is_insertable())
            .map(|f| f.column)
            .collect()
    }

    /// Number of columns every scanned row must have.
    pub fn width(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.access.is_selectable())
            .count()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.field == name)
    }
}

static SCHEMAS: LazyLock<DashMap<TypeId, Arc<RecordSchema>>> = LazyLock::new(DashMap::new);

/// The schema of `T`, derived on first use and cached for the process lifetime.
pub fn schema_of<T: Record>() -> Arc<RecordSchema> {
    let key = TypeId::of::<T>();
    if let Some(schema) = SCHEMAS.get(&key) {
        return Arc::clone(schema.value());
    }
    let entry = SCHEMAS
        .entry(key)
        .or_insert_with(|| Arc::new(T::describe()));
    Arc::clone(entry.value())
}
