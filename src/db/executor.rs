//! Execution capabilities.
//!
//! The mapper and the transaction coordinator only talk to the traits in this
//! module, never to a concrete connection type:
//!
//! - [`Executor`]: run a statement, get rows or an affected-row count
//! - [`Session`]: a leased connection that can also demarcate a transaction
//! - [`Backend`]: a pool that hands out sessions
//!
//! A session is released back to its pool when it is dropped.

use crate::db::transaction::TxOptions;
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use async_trait::async_trait;

/// Anything that can run a query and return rows.
#[async_trait]
pub trait Executor: Send {
    /// Run a query and collect every row, in the order the backend returned them.
    async fn fetch_all(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64>;
}

/// An exclusively leased connection.
///
/// Implementations must roll back (or discard the physical connection) when
/// dropped while a transaction is still open.
#[async_trait]
pub trait Session: Executor {
    async fn begin(&mut self, options: &TxOptions) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    /// Roll back the open transaction. Returns `DbError::TxClosed` when none is open.
    async fn rollback(&mut self) -> DbResult<()>;

    fn in_transaction(&self) -> bool;
}

/// A connection pool.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Lease a connection, waiting for the pool's configured acquire timeout.
    async fn acquire(&self) -> DbResult<Self::Session>;

    /// Liveness probe.
    async fn ping(&self) -> DbResult<()>;

    /// Drain and close every connection. Calling it twice is a no-op.
    async fn close(&self);
}
