//! Connection pool management.
//!
//! [`PgBackend`] wraps a lazily connected `PgPool` plus its health-check task;
//! [`PgSession`] is one leased connection. Transactions are demarcated with
//! plain `BEGIN`/`COMMIT`/`ROLLBACK` statements on the leased connection, so a
//! session always knows whether it is inside a transaction and can clean up
//! when it is dropped mid-flight.

use crate::config::DbConfig;
use crate::db::executor::{Backend, Executor, Session};
use crate::db::params::build_query;
use crate::db::transaction::TxOptions;
use crate::db::types::decode_row;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, PgPool, Postgres};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// SQLSTATE reported when COMMIT ends a transaction that had already failed.
const IN_FAILED_TRANSACTION: &str = "25P02";

/// Postgres connection pool.
pub struct PgBackend {
    pool: PgPool,
    closed: AtomicBool,
    health_check: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PgBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBackend")
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("health_check", &self.health_check.is_some())
            .finish()
    }
}

impl PgBackend {
    /// Build the pool from structured configuration.
    ///
    /// No connection is opened here; the pool dials on first use and in the
    /// background to reach `min_conns`. Call [`Backend::ping`] to fail fast.
    /// Must run inside a Tokio runtime.
    pub fn connect(config: &DbConfig) -> DbResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            DbError::internal("the connection pool must be created inside a Tokio runtime")
        })?;

        let options = config.connect_options()?;
        let pool = config.pool_options().connect_lazy_with(options);

        let health_check = config
            .health_check_period()
            .map(|period| runtime.spawn(health_check_loop(pool.clone(), period)));

        info!(
            url = %config.masked_url(),
            max_conns = config.max_conns,
            min_conns = config.min_conns,
            health_check = health_check.is_some(),
            "Connection pool created"
        );

        Ok(Self {
            pool,
            closed: AtomicBool::new(false),
            health_check,
        })
    }

    /// Wrap an existing pool. No health-check task is started.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
            health_check: None,
        }
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.pool.is_closed()
    }

    /// Report a pool timeout with the configured acquire bound.
    fn lease_error(&self, e: sqlx::Error) -> DbError {
        match e {
            sqlx::Error::PoolTimedOut => {
                let secs = self.pool.options().get_acquire_timeout().as_secs();
                DbError::timeout("connection pool acquire", u32::try_from(secs).unwrap_or(u32::MAX))
            }
            other => other.into(),
        }
    }
}

#[async_trait]
impl Backend for PgBackend {
    type Session = PgSession;

    async fn acquire(&self) -> DbResult<PgSession> {
        let conn = self.pool.acquire().await.map_err(|e| self.lease_error(e))?;
        Ok(PgSession::new(conn))
    }

    async fn ping(&self) -> DbResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| self.lease_error(e))?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Connection pool already closed");
            return;
        }
        if let Some(handle) = &self.health_check {
            handle.abort();
        }
        self.pool.close().await;
        info!("Connection pool closed");
    }
}

impl Drop for PgBackend {
    fn drop(&mut self) {
        if let Some(handle) = &self.health_check {
            handle.abort();
        }
    }
}

/// Periodically ping idle connections and discard the broken ones.
async fn health_check_loop(pool: PgPool, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if pool.is_closed() {
            break;
        }
        let (checked, discarded) = check_idle_connections(&pool).await;
        debug!(checked, discarded, size = pool.size(), "Health check completed");
    }
}

async fn check_idle_connections(pool: &PgPool) -> (usize, usize) {
    let mut checked = 0;
    let mut discarded = 0;

    for _ in 0..pool.num_idle() {
        let Some(mut conn) = pool.try_acquire() else {
            break;
        };
        checked += 1;
        if let Err(e) = conn.ping().await {
            warn!(error = %e, "Health check failed, discarding connection");
            drop(conn.detach());
            discarded += 1;
        }
    }

    (checked, discarded)
}

/// Transaction state of a leased connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TxState {
    #[default]
    Idle,
    Open,
    /// A statement failed; the server has aborted the transaction.
    Aborted,
}

/// How a `commit` request ends the open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Commit,
    /// `COMMIT` of an aborted transaction would silently roll back.
    RollbackAborted,
}

impl TxState {
    fn is_open(self) -> bool {
        self != TxState::Idle
    }

    fn begin(self) -> DbResult<TxState> {
        if self.is_open() {
            return Err(DbError::invalid_input(
                "a transaction is already open on this session",
            ));
        }
        Ok(TxState::Open)
    }

    fn after_statement<T>(self, result: &DbResult<T>) -> TxState {
        match (self, result) {
            (TxState::Open, Err(DbError::Database { .. })) => TxState::Aborted,
            (state, _) => state,
        }
    }

    fn ending(self) -> DbResult<Ending> {
        match self {
            TxState::Idle => Err(DbError::TxClosed),
            TxState::Open => Ok(Ending::Commit),
            TxState::Aborted => Ok(Ending::RollbackAborted),
        }
    }
}

fn aborted_commit_error() -> DbError {
    DbError::database(
        "commit unexpectedly resulted in rollback",
        Some(IN_FAILED_TRANSACTION.to_string()),
        "A statement inside the transaction failed; inspect the earlier error",
    )
}

/// A leased Postgres connection.
///
/// Dropping the session returns the connection to the pool. If a transaction
/// is still open at that point a `ROLLBACK` is scheduled first; when that is
/// impossible the connection is discarded instead of being reused.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
    state: TxState,
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("attached", &self.conn.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl PgSession {
    fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Some(conn),
            state: TxState::Idle,
        }
    }

    fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::internal("session connection was discarded"))
    }

    async fn simple(&mut self, statement: &str) -> DbResult<()> {
        let conn = self.conn()?;
        sqlx::Executor::execute(&mut *conn, statement).await?;
        Ok(())
    }

    async fn fetch_rows(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let conn = self.conn()?;
        let rows = build_query(sql, args).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute_statement(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        let conn = self.conn()?;
        let done = build_query(sql, args).execute(&mut *conn).await?;
        Ok(done.rows_affected())
    }

    /// Close the physical connection instead of returning it to the pool.
    fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
        self.state = TxState::Idle;
    }

    fn track<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        self.state = self.state.after_statement(&result);
        result
    }
}

#[async_trait]
impl Executor for PgSession {
    async fn fetch_all(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let result = self.fetch_rows(sql, args).await;
        self.track(result)
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        let result = self.execute_statement(sql, args).await;
        self.track(result)
    }
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self, options: &TxOptions) -> DbResult<()> {
        let next = self.state.begin()?;
        self.simple(&options.begin_statement()).await?;
        self.state = next;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        match self.state.ending()? {
            Ending::RollbackAborted => {
                if self.simple("ROLLBACK").await.is_err() {
                    self.discard();
                }
                self.state = TxState::Idle;
                Err(aborted_commit_error())
            }
            Ending::Commit => match self.simple("COMMIT").await {
                Ok(()) => {
                    self.state = TxState::Idle;
                    Ok(())
                }
                Err(e @ DbError::Database { .. }) => {
                    // The server ended the transaction.
                    self.state = TxState::Idle;
                    Err(e)
                }
                Err(e) => {
                    self.discard();
                    Err(e)
                }
            },
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.state.is_open() {
            return Err(DbError::TxClosed);
        }
        match self.simple("ROLLBACK").await {
            Ok(()) => {
                self.state = TxState::Idle;
                Ok(())
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    fn in_transaction(&self) -> bool {
        self.state.is_open()
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if !self.state.is_open() {
            return;
        }
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match sqlx::Executor::execute(&mut *conn, "ROLLBACK").await {
                        Ok(_) => warn!("Transaction rolled back via Drop"),
                        Err(e) => {
                            warn!(error = %e, "Rollback via Drop failed, discarding connection");
                            drop(conn.detach());
                        }
                    }
                });
            }
            Err(_) => {
                warn!("No runtime to roll back abandoned transaction, discarding connection");
                drop(conn.detach());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement_error() -> DbResult<u64> {
        Err(DbError::database(
            "relation \"missing\" does not exist",
            Some("42P01".to_string()),
            "Check the SQL syntax and referenced objects",
        ))
    }

    #[test]
    fn test_begin_rejects_nested_transaction() {
        assert_eq!(TxState::Idle.begin().unwrap(), TxState::Open);
        assert!(matches!(
            TxState::Open.begin(),
            Err(DbError::InvalidInput { .. })
        ));
        assert!(TxState::Aborted.begin().is_err());
    }

    #[test]
    fn test_statement_error_aborts_open_transaction() {
        let state = TxState::Open.after_statement(&statement_error());
        assert_eq!(state, TxState::Aborted);
        assert!(state.is_open());

        // Later successes do not revive it.
        assert_eq!(state.after_statement(&Ok(1u64)), TxState::Aborted);
    }

    #[test]
    fn test_errors_outside_transaction_are_not_tracked() {
        assert_eq!(TxState::Idle.after_statement(&statement_error()), TxState::Idle);

        let timeout: DbResult<u64> = Err(DbError::timeout("query", 5));
        assert_eq!(TxState::Open.after_statement(&timeout), TxState::Open);
    }

    #[test]
    fn test_commit_of_aborted_transaction_rolls_back() {
        assert_eq!(TxState::Open.ending().unwrap(), Ending::Commit);
        assert_eq!(TxState::Aborted.ending().unwrap(), Ending::RollbackAborted);
        assert!(matches!(TxState::Idle.ending(), Err(DbError::TxClosed)));

        let err = aborted_commit_error();
        assert_eq!(err.sql_state(), Some(IN_FAILED_TRANSACTION));
        assert!(err.suggestion().is_some());
    }
}
