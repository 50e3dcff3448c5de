//! Statement builder.
//!
//! Builders collect SQL fragments written with `?` markers and their
//! arguments; [`to_statement`](SelectBuilder::to_statement) numbers the
//! markers for the target placeholder style and checks that every marker has
//! an argument. Write `??` for a literal question mark.
//!
//! Identifiers are emitted as given. Only values travel as arguments.
//!
//! ```ignore
//! let stmt = PSQL
//!     .select(["id", "name", "email"])
//!     .from("users")
//!     .where_eq("active", true)
//!     .order_by("id")
//!     .to_statement()?;
//! assert_eq!(stmt.sql, "SELECT id, name, email FROM users WHERE active = $1 ORDER BY id");
//! ```

use crate::error::{DbError, DbResult};
use crate::mapper::{Record, schema_of};
use crate::models::SqlValue;

/// How bound parameters are written in the final SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placeholder {
    /// `$1, $2, ...` (PostgreSQL)
    #[default]
    Dollar,
    /// `?` left as is
    Question,
}

/// SQL text plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Entry point for building statements with a fixed placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementBuilder {
    placeholder: Placeholder,
}

/// Builder for PostgreSQL (`$n` placeholders).
pub const PSQL: StatementBuilder = StatementBuilder::new(Placeholder::Dollar);

impl StatementBuilder {
    pub const fn new(placeholder: Placeholder) -> Self {
        Self { placeholder }
    }

    pub fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    pub fn select<I, S>(&self, columns: I) -> SelectBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SelectBuilder {
            placeholder: self.placeholder,
            columns: columns.into_iter().map(Into::into).collect(),
            from: None,
            filter: Filter::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// `SELECT` of every selectable column of `T` from its table.
    pub fn select_record<T: Record>(&self) -> SelectBuilder {
        let schema = schema_of::<T>();
        self.select(schema.select_columns()).from(schema.table)
    }

    pub fn insert(&self, table: impl Into<String>) -> InsertBuilder {
        InsertBuilder {
            placeholder: self.placeholder,
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// `INSERT` of the insertable fields of `record` into its table.
    pub fn insert_record<T: Record>(&self, record: &T) -> InsertBuilder {
        let schema = schema_of::<T>();
        self.insert(schema.table)
            .columns(schema.insert_columns())
            .values(record.insert_values())
    }

    pub fn update(&self, table: impl Into<String>) -> UpdateBuilder {
        UpdateBuilder {
            placeholder: self.placeholder,
            table: table.into(),
            assignments: Vec::new(),
            filter: Filter::default(),
            returning: Vec::new(),
        }
    }

    pub fn delete(&self, table: impl Into<String>) -> DeleteBuilder {
        DeleteBuilder {
            placeholder: self.placeholder,
            table: table.into(),
            filter: Filter::default(),
            returning: Vec::new(),
        }
    }
}

// =============================================================================
// Shared pieces
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Filter {
    predicates: Vec<String>,
    args: Vec<SqlValue>,
}

impl Filter {
    fn push(&mut self, expr: String, args: impl IntoIterator<Item = SqlValue>) {
        self.predicates.push(expr);
        self.args.extend(args);
    }

    fn push_eq(&mut self, column: String, value: SqlValue) {
        if value.is_null() {
            self.predicates.push(format!("{} IS NULL", column));
        } else {
            self.predicates.push(format!("{} = ?", column));
            self.args.push(value);
        }
    }

    fn write(&self, sql: &mut String, args: &mut Vec<SqlValue>) {
        if self.predicates.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        sql.push_str(&self.predicates.join(" AND "));
        args.extend(self.args.iter().cloned());
    }
}

fn write_returning(sql: &mut String, returning: &[String]) {
    if !returning.is_empty() {
        sql.push_str(" RETURNING ");
        sql.push_str(&returning.join(", "));
    }
}

fn require_table(table: &str, verb: &str) -> DbResult<()> {
    if table.trim().is_empty() {
        return Err(DbError::invalid_input(format!("{} requires a table name", verb)));
    }
    Ok(())
}

/// Number the `?` markers in `sql` and check them against `args`.
fn finish(placeholder: Placeholder, sql: &str, args: Vec<SqlValue>) -> DbResult<Statement> {
    let mut out = String::with_capacity(sql.len() + args.len() * 2);
    let mut markers = 0usize;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '?' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'?') {
            chars.next();
            out.push('?');
            continue;
        }
        markers += 1;
        match placeholder {
            Placeholder::Dollar => {
                out.push('$');
                out.push_str(&markers.to_string());
            }
            Placeholder::Question => out.push('?'),
        }
    }

    if markers != args.len() {
        return Err(DbError::invalid_input(format!(
            "statement has {} placeholders but {} arguments",
            markers,
            args.len()
        )));
    }

    Ok(Statement { sql: out, args })
}

// =============================================================================
// SELECT
// =============================================================================

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    placeholder: Placeholder,
    columns: Vec<String>,
    from: Option<String>,
    filter: Filter,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectBuilder {
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from = Some(table.into());
        self
    }

    /// Add a predicate written with `?` markers. Predicates are joined with `AND`.
    pub fn where_clause(
        mut self,
        expr: impl Into<String>,
        args: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.filter.push(expr.into(), args);
        self
    }

    /// `column = ?`, or `column IS NULL` for a NULL value.
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filter.push_eq(column.into(), value.into());
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn to_statement(&self) -> DbResult<Statement> {
        if self.columns.is_empty() {
            return Err(DbError::invalid_input("SELECT requires at least one column"));
        }

        let mut sql = format!("SELECT {}", self.columns.join(", "));
        let mut args = Vec::new();

        if let Some(table) = &self.from {
            require_table(table, "SELECT ... FROM")?;
            sql.push_str(" FROM ");
            sql.push_str(table);
        }
        self.filter.write(&mut sql, &mut args);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        finish(self.placeholder, &sql, args)
    }
}

// =============================================================================
// INSERT
// =============================================================================

#[derive(Debug, Clone)]
pub struct InsertBuilder {
    placeholder: Placeholder,
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    returning: Vec<String>,
}

impl InsertBuilder {
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add one row of values, in column order.
    pub fn values(mut self, row: impl IntoIterator<Item = SqlValue>) -> Self {
        self.rows.push(row.into_iter().collect());
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn to_statement(&self) -> DbResult<Statement> {
        require_table(&self.table, "INSERT")?;
        if self.columns.is_empty() {
            return Err(DbError::invalid_input("INSERT requires at least one column"));
        }
        if self.rows.is_empty() {
            return Err(DbError::invalid_input("INSERT requires at least one row of values"));
        }

        let markers = vec!["?"; self.columns.len()].join(", ");
        let mut tuples = Vec::with_capacity(self.rows.len());
        let mut args = Vec::with_capacity(self.rows.len() * self.columns.len());

        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(DbError::invalid_input(format!(
                    "INSERT row {} has {} values for {} columns",
                    index,
                    row.len(),
                    self.columns.len()
                )));
            }
            tuples.push(format!("({})", markers));
            args.extend(row.iter().cloned());
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            tuples.join(", ")
        );
        write_returning(&mut sql, &self.returning);

        finish(self.placeholder, &sql, args)
    }
}

// =============================================================================
// UPDATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    placeholder: Placeholder,
    table: String,
    assignments: Vec<(String, SqlValue)>,
    filter: Filter,
    returning: Vec<String>,
}

impl UpdateBuilder {
    pub fn set(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn where_clause(
        mut self,
        expr: impl Into<String>,
        args: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.filter.push(expr.into(), args);
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filter.push_eq(column.into(), value.into());
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn to_statement(&self) -> DbResult<Statement> {
        require_table(&self.table, "UPDATE")?;
        if self.assignments.is_empty() {
            return Err(DbError::invalid_input("UPDATE requires at least one SET clause"));
        }

        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", column))
            .collect();
        let mut args: Vec<SqlValue> = self.assignments.iter().map(|(_, v)| v.clone()).collect();

        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        self.filter.write(&mut sql, &mut args);
        write_returning(&mut sql, &self.returning);

        finish(self.placeholder, &sql, args)
    }
}

// =============================================================================
// DELETE
// =============================================================================

#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    placeholder: Placeholder,
    table: String,
    filter: Filter,
    returning: Vec<String>,
}

impl DeleteBuilder {
    pub fn where_clause(
        mut self,
        expr: impl Into<String>,
        args: impl IntoIterator<Item = SqlValue>,
    ) -> Self {
        self.filter.push(expr.into(), args);
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filter.push_eq(column.into(), value.into());
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn to_statement(&self) -> DbResult<Statement> {
        require_table(&self.table, "DELETE")?;

        let mut sql = format!("DELETE FROM {}", self.table);
        let mut args = Vec::new();
        self.filter.write(&mut sql, &mut args);
        write_returning(&mut sql, &self.returning);

        finish(self.placeholder, &sql, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueKind;

    #[test]
    fn test_select_with_dollar_placeholders() {
        let stmt = PSQL
            .select(["id", "name", "email"])
            .from("users")
            .where_eq("active", true)
            .where_clause("created_at > ? AND age < ?", [
                SqlValue::Text("2024-01-01".into()),
                SqlValue::Int(40),
            ])
            .order_by("id DESC")
            .limit(10)
            .offset(20)
            .to_statement()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT id, name, email FROM users WHERE active = $1 AND created_at > $2 AND age < $3 ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.args.len(), 3);
        assert_eq!(stmt.args[0], SqlValue::Bool(true));
    }

    #[test]
    fn test_question_placeholders_kept() {
        let stmt = StatementBuilder::new(Placeholder::Question)
            .select(["id"])
            .from("users")
            .where_eq("id", 7i64)
            .to_statement()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT id FROM users WHERE id = ?");
    }

    #[test]
    fn test_escaped_question_mark() {
        let stmt = PSQL
            .select(["data"])
            .from("docs")
            .where_clause("data ?? 'key' AND id = ?", [SqlValue::Int(1)])
            .to_statement()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT data FROM docs WHERE data ? 'key' AND id = $1");
    }

    #[test]
    fn test_null_equality_becomes_is_null() {
        let stmt = PSQL
            .select(["id"])
            .from("users")
            .where_eq("deleted_at", SqlValue::Null(ValueKind::Timestamp))
            .to_statement()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT id FROM users WHERE deleted_at IS NULL");
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_placeholder_count_mismatch() {
        let err = PSQL
            .select(["id"])
            .from("users")
            .where_clause("id = ? AND name = ?", [SqlValue::Int(1)])
            .to_statement()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_select_without_table() {
        let stmt = PSQL
            .select(["current_setting('application_name')"])
            .to_statement()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT current_setting('application_name')");
    }

    #[test]
    fn test_empty_columns_rejected() {
        let columns: Vec<String> = Vec::new();
        assert!(PSQL.select(columns).from("users").to_statement().is_err());
        assert!(PSQL.select(["id"]).from("  ").to_statement().is_err());
    }

    #[test]
    fn test_insert_multiple_rows_returning() {
        let stmt = PSQL
            .insert("users")
            .columns(["name", "age"])
            .values([SqlValue::from("a"), SqlValue::Int(1)])
            .values([SqlValue::from("b"), SqlValue::Int(2)])
            .returning(["id"])
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO users (name, age) VALUES ($1, $2), ($3, $4) RETURNING id"
        );
        assert_eq!(stmt.args.len(), 4);
    }

    #[test]
    fn test_insert_row_width_checked() {
        let err = PSQL
            .insert("users")
            .columns(["name", "age"])
            .values([SqlValue::from("a")])
            .to_statement()
            .unwrap_err();
        assert!(err.to_string().contains("1 values for 2 columns"));
        assert!(PSQL.insert("").columns(["a"]).to_statement().is_err());
        assert!(PSQL.insert("users").columns(["a"]).to_statement().is_err());
    }

    #[test]
    fn test_update() {
        let stmt = PSQL
            .update("accounts")
            .set("balance", 90i64)
            .set("note", None::<String>)
            .where_eq("id", 1i64)
            .returning(["balance"])
            .to_statement()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE accounts SET balance = $1, note = $2 WHERE id = $3 RETURNING balance"
        );
        assert_eq!(stmt.args[1], SqlValue::Null(ValueKind::Text));
        assert!(PSQL.update("accounts").to_statement().is_err());
    }

    #[test]
    fn test_delete() {
        let stmt = PSQL
            .delete("sessions")
            .where_clause("expires_at < now()", Vec::new())
            .to_statement()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM sessions WHERE expires_at < now()");
        assert!(PSQL.delete("").to_statement().is_err());
    }
}
