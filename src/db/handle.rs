//! The shared database handle.

use crate::config::{CONNECT_TIMEOUT, DbConfig};
use crate::db::executor::{Backend, Executor};
use crate::db::pool::PgBackend;
use crate::db::transaction::{
    IsolationLevel, Tx, TxOptions, acquire_session, run_in_transaction,
};
use crate::error::{DbError, DbResult};
use crate::mapper::{Mapper, Record};
use crate::models::{Row, SqlValue};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Handle to a connection pool.
///
/// Cloning is cheap and every clone shares the same pool. Transactions run
/// concurrently up to the pool's `max_conns`; the pool is the only shared bound.
pub struct Db<B: Backend = PgBackend> {
    backend: Arc<B>,
}

impl<B: Backend> Clone for Db<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: Backend + std::fmt::Debug> std::fmt::Debug for Db<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("backend", &self.backend).finish()
    }
}

impl Db<PgBackend> {
    /// Create a Postgres pool from `config`.
    ///
    /// Connections are opened lazily; call [`Db::ping`] to verify the server
    /// is reachable.
    pub fn connect(config: &DbConfig) -> DbResult<Self> {
        Ok(Self::new(PgBackend::connect(config)?))
    }
}

impl<B: Backend> Db<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Lease a connection, waiting up to the pool's acquire timeout.
    pub async fn acquire(&self) -> DbResult<B::Session> {
        acquire_session(self.backend.as_ref(), None).await
    }

    /// Lease a connection, giving up after `deadline`.
    pub async fn acquire_within(&self, deadline: Duration) -> DbResult<B::Session> {
        acquire_session(self.backend.as_ref(), Some(deadline)).await
    }

    /// Check that the database answers, within the connect timeout.
    pub async fn ping(&self) -> DbResult<()> {
        match tokio::time::timeout(CONNECT_TIMEOUT, self.backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                "ping",
                u32::try_from(CONNECT_TIMEOUT.as_secs()).unwrap_or(u32::MAX),
            )),
        }
    }

    /// Close every connection. Later calls do nothing.
    pub async fn close(&self) {
        info!("Closing database pool");
        self.backend.close().await;
    }

    /// Run `f` in a transaction opened with `options`.
    ///
    /// ```ignore
    /// let total = db
    ///     .transaction(TxOptions::default(), |tx| {
    ///         Box::pin(async move {
    ///             tx.execute("UPDATE accounts SET balance = balance - $1 WHERE id = $2", &args)
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, options: TxOptions, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Tx<B::Session>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        run_in_transaction(self.backend.as_ref(), options, f).await
    }

    /// Read-committed, read-write transaction.
    pub async fn with_transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Tx<B::Session>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        self.transaction(TxOptions::default(), f).await
    }

    /// Read-write transaction at `level`.
    pub async fn with_isolation<T, F>(&self, level: IsolationLevel, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Tx<B::Session>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        self.transaction(TxOptions::default().isolation(level), f)
            .await
    }

    /// Read-committed, read-only transaction.
    pub async fn read_only_transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Tx<B::Session>) -> BoxFuture<'t, DbResult<T>> + Send,
    {
        self.transaction(TxOptions::read_only(), f).await
    }

    /// Run a query outside any explicit transaction and map the rows into `T`.
    pub async fn query_into<T: Record>(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<T>> {
        let mut session = self.acquire().await?;
        Mapper::<T>::new().query_into(&mut session, sql, args).await
    }
}

/// Each call leases its own connection.
#[async_trait]
impl<B: Backend> Executor for Db<B> {
    async fn fetch_all(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let mut session = self.acquire().await?;
        session.fetch_all(sql, args).await
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        let mut session = self.acquire().await?;
        session.execute(sql, args).await
    }
}
