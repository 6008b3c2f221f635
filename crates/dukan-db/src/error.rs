//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Ledger rule (CoreError)             │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ← classification + context                      │
//! │       │                                                                 │
//! │       ├── is_recoverable() ──► reconnect + single retry (retry.rs)     │
//! │       │                                                                 │
//! │       └── otherwise ──► ROLLBACK, surfaced verbatim to the caller      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dukan_core::CoreError;
use thiserror::Error;

/// SQLite primary result codes that mean the handle itself is unusable.
const SQLITE_IOERR: i32 = 10;
const SQLITE_MISUSE: i32 = 21;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - `fetch_one` returns no rows
    /// - Id doesn't exist (or was deleted by an earlier operation)
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two customers with the same phone
    /// - Any UNIQUE index violation
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Deleting a customer that still has credit transactions
    /// - Credit transaction for a customer id that doesn't exist
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The database could not be opened.
    ///
    /// ## When This Occurs
    /// - Directory can't be created
    /// - File permissions issue
    /// - Disk full
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The open handle became unusable mid-flight.
    ///
    /// The only recoverable variant: the serializer drops the handle,
    /// reopens, and retries the operation once.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Schema creation or an additive column migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// BEGIN / COMMIT could not be issued.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A ledger rule was violated inside a unit of work.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// A fatal backup or restore step failed.
    #[error("Backup failed: {0}")]
    Backup(String),

    /// Filesystem error (directories, backup copies).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error for a payload that must round-trip.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if reconnecting and retrying may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DbError::ConnectionLost(_))
    }
}

fn is_handle_failure(code: Option<&str>, message: &str) -> bool {
    let primary = code
        .and_then(|c| c.parse::<i32>().ok())
        .map(|c| c & 0xff);
    matches!(primary, Some(SQLITE_IOERR) | Some(SQLITE_MISUSE))
        || message.contains("database connection is closed")
        || message.contains("connection closed")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound                → DbError::NotFound
/// sqlx::Error::Database (UNIQUE / FK)     → UniqueViolation / ForeignKeyViolation
/// sqlx::Error::Database (IOERR / MISUSE)  → DbError::ConnectionLost
/// sqlx::Error::Io / WorkerCrashed         → DbError::ConnectionLost
/// sqlx::Error::Database (other)           → DbError::QueryFailed
/// Other                                   → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code();

                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if is_handle_failure(code.as_deref(), msg) {
                    DbError::ConnectionLost(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::Io(io_err) => DbError::ConnectionLost(io_err.to_string()),

            sqlx::Error::WorkerCrashed => {
                DbError::ConnectionLost("SQLite worker thread crashed".to_string())
            }

            sqlx::Error::PoolClosed => DbError::ConnectionLost("Handle is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DbError {
    fn from(err: toml::ser::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

impl From<dukan_core::ValidationError> for DbError {
    fn from(err: dukan_core::ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
