//! Error types for the database access layer.
//!
//! Every fallible operation in the crate returns [`DbError`]. Variants are
//! split by the phase that failed (configuration, acquisition, begin, commit,
//! rollback, mapping) so callers can tell a pool problem from a SQL problem.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("acquiring connection: {source}")]
    Acquire { source: Box<DbError> },

    #[error("begin tx: {source}")]
    Begin { source: Box<DbError> },

    #[error("commit tx: {source}")]
    Commit { source: Box<DbError> },

    /// The transaction's end state is unknown to the caller.
    #[error("rollback tx: {source} (original: {original})")]
    Rollback {
        source: Box<DbError>,
        original: Box<DbError>,
    },

    #[error("transaction already closed")]
    TxClosed,

    /// Business logic inside a transaction failed.
    #[error("{source}")]
    Caller { source: BoxError },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "40001" for serialization failure
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Mapping error: {message}")]
    Mapping { message: String },

    #[error("Timeout: {operation}{}", elapsed_suffix(.elapsed_secs))]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn elapsed_suffix(elapsed_secs: &u32) -> String {
    match *elapsed_secs {
        0 => " timed out".to_string(),
        secs => format!(" exceeded {secs}s"),
    }
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Wrap a failure that happened while leasing a connection.
    pub fn acquire(source: DbError) -> Self {
        Self::Acquire {
            source: Box::new(source),
        }
    }

    /// Wrap a failure that happened while opening a transaction.
    pub fn begin(source: DbError) -> Self {
        Self::Begin {
            source: Box::new(source),
        }
    }

    /// Wrap a failure reported by COMMIT.
    pub fn commit(source: DbError) -> Self {
        Self::Commit {
            source: Box::new(source),
        }
    }

    /// Combine a failed rollback with the error that triggered it.
    pub fn rollback(source: DbError, original: DbError) -> Self {
        Self::Rollback {
            source: Box::new(source),
            original: Box::new(original),
        }
    }

    /// Create an error from caller business logic.
    pub fn caller(source: impl Into<BoxError>) -> Self {
        Self::Caller {
            source: source.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a row mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Create a timeout error. Pass `0` when the bound is unknown.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Acquire { source } | Self::Begin { source } | Self::Commit { source } => {
                source.suggestion()
            }
            _ => None,
        }
    }

    /// SQLSTATE of the underlying database error, looking through wrappers.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::Acquire { source }
            | Self::Begin { source }
            | Self::Commit { source }
            | Self::Rollback { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Acquire { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// True for the benign "transaction already closed" outcome.
    pub fn is_tx_closed(&self) -> bool {
        matches!(self, Self::TxClosed)
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = match code.as_deref() {
                    Some("40001") | Some("40P01") => "Retry the transaction",
                    Some("25006") => "The statement ran inside a read-only transaction",
                    _ => "Check the SQL syntax and referenced objects",
                };
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::mapping(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::mapping(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::mapping(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::mapping(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::mapping(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
