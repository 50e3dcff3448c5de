//! Database access layer.
//!
//! - Connection pool management (`pool`)
//! - Transaction demarcation (`transaction`)
//! - The shared handle (`handle`)
//! - Parameter binding and type mappings for PostgreSQL

pub mod executor;
pub mod handle;
pub(crate) mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use executor::{Backend, Executor, Session};
pub use handle::Db;
pub use pool::{PgBackend, PgSession};
pub use transaction::{
    AccessMode, IsolationLevel, Tx, TxOptions, acquire_session, ensure_closed, run_in_transaction,
};
