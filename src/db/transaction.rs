//! Transaction demarcation.
//!
//! [`run_in_transaction`] leases a session, opens a transaction with the
//! requested [`TxOptions`], hands a [`Tx`] to caller logic and then ends the
//! transaction exactly once: commit when the logic succeeds, rollback when it
//! fails. A panic or a dropped future leaves the cleanup to the session's
//! `Drop`.

use crate::db::executor::{Backend, Executor, Session};
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "read uncommitted" => Ok(Self::ReadUncommitted),
            "read committed" => Ok(Self::ReadCommitted),
            "repeatable read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            other => Err(DbError::invalid_input(format!(
                "unknown isolation level '{}'",
                other
            ))),
        }
    }
}

/// Whether the transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadWrite => "READ WRITE",
            Self::ReadOnly => "READ ONLY",
        }
    }
}

/// Options fixed when a transaction begins.
///
/// The default is read-committed, read-write, not deferrable, with the pool's
/// own acquire timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    isolation: IsolationLevel,
    access_mode: AccessMode,
    deferrable: bool,
    acquire_timeout: Option<Duration>,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-committed, read-only.
    pub fn read_only() -> Self {
        Self::default().access_mode(AccessMode::ReadOnly)
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// Only meaningful for serializable, read-only transactions.
    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    /// Give up acquiring a connection after `timeout` instead of the pool default.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_read_only(&self) -> bool {
        self.access_mode == AccessMode::ReadOnly
    }

    pub fn is_deferrable(&self) -> bool {
        self.deferrable
    }

    pub fn acquire_deadline(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    /// The `BEGIN` statement opening a transaction with these options.
    pub fn begin_statement(&self) -> String {
        let mut sql = format!(
            "BEGIN ISOLATION LEVEL {} {}",
            self.isolation.as_sql(),
            self.access_mode.as_sql()
        );
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

/// An open transaction on a leased session.
///
/// Caller logic receives `&mut Tx` and can only run statements through it;
/// ending the transaction is the coordinator's job.
pub struct Tx<S> {
    session: S,
    options: TxOptions,
}

impl<S: Session> Tx<S> {
    /// The options this transaction was opened with.
    pub fn options(&self) -> &TxOptions {
        &self.options
    }
}

impl<S: fmt::Debug> fmt::Debug for Tx<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tx")
            .field("session", &self.session)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl<S: Session> Executor for Tx<S> {
    async fn fetch_all(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.session.fetch_all(sql, args).await
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        self.session.execute(sql, args).await
    }
}

/// Lease a session from `backend`, bounded by `deadline` when given.
pub async fn acquire_session<B: Backend>(
    backend: &B,
    deadline: Option<Duration>,
) -> DbResult<B::Session> {
    let leased = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, backend.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                "connection acquire",
                u32::try_from(deadline.as_secs()).unwrap_or(u32::MAX),
            )),
        },
        None => backend.acquire().await,
    };
    leased.map_err(DbError::acquire)
}

/// Roll back whatever is still open on `session`.
///
/// A transaction that is already closed is not an error.
pub async fn ensure_closed<S: Session>(session: &mut S) -> DbResult<()> {
    if !session.in_transaction() {
        return Ok(());
    }
    match session.rollback().await {
        Err(e) if e.is_tx_closed() => Ok(()),
        other => other,
    }
}

/// Run `f` inside a transaction on a connection leased from `backend`.
///
/// - acquisition failure: `DbError::Acquire`
/// - `BEGIN` failure: `DbError::Begin`
/// - `f` fails: the transaction is rolled back and `f`'s error returned, or
///   `DbError::Rollback` carrying both errors if the rollback fails too
/// - `COMMIT` failure: `DbError::Commit`
pub async fn run_in_transaction<B, T, F>(backend: &B, options: TxOptions, f: F) -> DbResult<T>
where
    B: Backend,
    T: Send,
    F: for<'t> FnOnce(&'t mut Tx<B::Session>) -> BoxFuture<'t, DbResult<T>> + Send,
{
    let mut session = acquire_session(backend, options.acquire_timeout).await?;
    session.begin(&options).await.map_err(DbError::begin)?;
    debug!(
        isolation = %options.isolation,
        read_only = options.is_read_only(),
        "Transaction started"
    );

    let mut tx = Tx { session, options };
    match f(&mut tx).await {
        Ok(value) => {
            commit(&mut tx.session).await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(original) => {
            let err = rollback(&mut tx.session, original).await;
            debug!(error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

async fn commit<S: Session>(session: &mut S) -> DbResult<()> {
    let Err(e) = session.commit().await else {
        return Ok(());
    };
    let err = DbError::commit(e);
    match ensure_closed(session).await {
        Ok(()) => Err(err),
        Err(rb) => Err(DbError::rollback(rb, err)),
    }
}

async fn rollback<S: Session>(session: &mut S, original: DbError) -> DbError {
    match ensure_closed(session).await {
        Ok(()) => original,
        Err(rb) => DbError::rollback(rb, original),
    }
}
