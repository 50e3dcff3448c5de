//! In-memory backend for exercising the coordinator and the mapper without a
//! database server.
//!
//! Every session operation is appended to a shared journal. A tiny `ledger`
//! table of names stands in for real data: inserts made inside a transaction
//! are buffered and only become visible to other sessions on commit.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use txdb::db::{Backend, Executor, Session};
use txdb::error::{DbError, DbResult};
use txdb::models::{Row, SqlValue};
use txdb::{Db, TxOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire(u32),
    Begin(u32, TxOptions),
    Commit(u32),
    CommitFailed(u32),
    Rollback(u32),
    RollbackFailed(u32),
    DropRollback(u32),
    Release(u32),
}

impl Event {
    pub fn session(&self) -> u32 {
        match self {
            Event::Acquire(id)
            | Event::Begin(id, _)
            | Event::Commit(id)
            | Event::CommitFailed(id)
            | Event::Rollback(id)
            | Event::RollbackFailed(id)
            | Event::DropRollback(id)
            | Event::Release(id) => *id,
        }
    }
}

#[derive(Default)]
struct Shared {
    journal: Mutex<Vec<Event>>,
    ledger: Mutex<Vec<String>>,
    canned: Mutex<Vec<Row>>,
    next_id: AtomicU32,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl Shared {
    fn record(&self, event: Event) {
        self.journal.lock().unwrap().push(event);
    }
}

pub struct FakeBackend {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
}

impl FakeBackend {
    pub fn new(max_conns: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            permits: Arc::new(Semaphore::new(max_conns)),
        }
    }

    pub fn journal(&self) -> Vec<Event> {
        self.shared.journal.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.journal().iter().filter(|e| pred(e)).count()
    }

    pub fn ledger(&self) -> Vec<String> {
        self.shared.ledger.lock().unwrap().clone()
    }

    /// Rows returned by any query other than `SELECT name FROM ledger`.
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.shared.canned.lock().unwrap() = rows;
    }

    pub fn fail_begin(&self) {
        self.shared.fail_begin.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.shared.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.shared.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    type Session = FakeSession;

    async fn acquire(&self) -> DbResult<FakeSession> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DbError::connection("pool is closed", "Reconnect to the database"))?;
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.record(Event::Acquire(id));
        Ok(FakeSession {
            id,
            shared: Arc::clone(&self.shared),
            _permit: permit,
            open: None,
            pending: Vec::new(),
        })
    }

    async fn ping(&self) -> DbResult<()> {
        if self.permits.is_closed() {
            return Err(DbError::connection("pool is closed", "Reconnect to the database"));
        }
        Ok(())
    }

    async fn close(&self) {
        self.permits.close();
    }
}

pub struct FakeSession {
    id: u32,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
    open: Option<TxOptions>,
    pending: Vec<String>,
}

impl std::fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSession")
            .field("id", &self.id)
            .field("open", &self.open)
            .field("pending", &self.pending)
            .finish()
    }
}

impl FakeSession {
    pub fn id(&self) -> u32 {
        self.id
    }

    fn visible_names(&self) -> Vec<String> {
        let mut names = self.shared.ledger.lock().unwrap().clone();
        names.extend(self.pending.iter().cloned());
        names
    }
}

#[async_trait]
impl Executor for FakeSession {
    async fn fetch_all(&mut self, sql: &str, _args: &[SqlValue]) -> DbResult<Vec<Row>> {
        if sql == "FAIL" {
            return Err(DbError::database(
                "syntax error at or near \"FAIL\"",
                Some("42601".to_string()),
                "Check the SQL syntax and referenced objects",
            ));
        }
        if sql.starts_with("SELECT name FROM ledger") {
            return Ok(self
                .visible_names()
                .into_iter()
                .map(|name| Row::new(vec!["name".to_string()], vec![SqlValue::Text(name)]))
                .collect());
        }
        Ok(self.shared.canned.lock().unwrap().clone())
    }

    async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        if !sql.starts_with("INSERT INTO ledger") {
            return Ok(0);
        }
        let Some(SqlValue::Text(name)) = args.first() else {
            return Err(DbError::invalid_input("ledger insert needs a name"));
        };
        match &self.open {
            Some(options) if options.is_read_only() => Err(DbError::database(
                "cannot execute INSERT in a read-only transaction",
                Some("25006".to_string()),
                "The statement ran inside a read-only transaction",
            )),
            Some(_) => {
                self.pending.push(name.clone());
                Ok(1)
            }
            None => {
                self.shared.ledger.lock().unwrap().push(name.clone());
                Ok(1)
            }
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn begin(&mut self, options: &TxOptions) -> DbResult<()> {
        if self.shared.fail_begin.load(Ordering::SeqCst) {
            return Err(DbError::database(
                "permission denied",
                Some("42501".to_string()),
                "Check role privileges",
            ));
        }
        self.shared.record(Event::Begin(self.id, *options));
        self.open = Some(*options);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.open.is_none() {
            return Err(DbError::TxClosed);
        }
        if self.shared.fail_commit.load(Ordering::SeqCst) {
            self.shared.record(Event::CommitFailed(self.id));
            return Err(DbError::database(
                "could not serialize access due to concurrent update",
                Some("40001".to_string()),
                "Retry the transaction",
            ));
        }
        self.shared
            .ledger
            .lock()
            .unwrap()
            .extend(self.pending.drain(..));
        self.open = None;
        self.shared.record(Event::Commit(self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.open.is_none() {
            return Err(DbError::TxClosed);
        }
        self.pending.clear();
        self.open = None;
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            self.shared.record(Event::RollbackFailed(self.id));
            return Err(DbError::connection(
                "connection reset by peer",
                "Check network connectivity and database server status",
            ));
        }
        self.shared.record(Event::Rollback(self.id));
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.open.is_some()
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if self.open.take().is_some() {
            self.pending.clear();
            self.shared.record(Event::DropRollback(self.id));
        }
        self.shared.record(Event::Release(self.id));
    }
}

pub fn fake_db(max_conns: usize) -> Db<FakeBackend> {
    Db::new(FakeBackend::new(max_conns))
}

pub fn name_arg(name: &str) -> Vec<SqlValue> {
    vec![SqlValue::Text(name.to_string())]
}

pub const INSERT_NAME: &str = "INSERT INTO ledger (name) VALUES ($1)";
pub const SELECT_NAMES: &str = "SELECT name FROM ledger";
