//! txdb
//!
//! Transactional PostgreSQL access: a shared connection pool, a coordinator
//! that runs caller logic inside transactions and ends each one exactly once,
//! a mapper from result rows to record types, and a small statement builder.

pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;
pub mod query;

pub use config::DbConfig;
pub use db::{AccessMode, Db, Executor, IsolationLevel, Tx, TxOptions};
pub use error::{DbError, DbResult};
pub use mapper::{Mapper, Record};
pub use models::{Row, SqlValue};
pub use query::{PSQL, Placeholder, Statement, StatementBuilder};
