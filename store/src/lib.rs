//! Persistence for intake form lifecycles.
//!
//! This crate provides:
//! - Storage seams used by the lifecycle controller ([`FormStore`],
//!   [`UnitOfWork`], [`DraftStore`], [`AuditSink`])
//! - A SQLite implementation ([`SqliteFormStore`])
//! - Connection pooling (r2d2-sqlite) with WAL mode and a busy timeout
//! - Forward-only schema migrations tracked by `PRAGMA user_version`
//! - ACID transaction helpers and an async bridge over `spawn_blocking`

pub mod async_wrapper;
pub mod connection;
pub mod migrations;
pub mod repository;
pub mod sqlite;
pub mod transactions;

pub use connection::initialize_pool;
pub use repository::{
    AuditSink, Draft, DraftStore, FormStore, InstanceRepository, ResponseRepository,
    Submission, TemplateRepository, UnitOfWork,
};
pub use sqlite::SqliteFormStore;
pub use transactions::execute_in_transaction;

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Stored schema is invalid: {0}")]
    Schema(#[from] intake_engine::SchemaError),
}

impl DbError {
    /// True when the failure is a UNIQUE/PRIMARY KEY violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            ),
            _ => false,
        }
    }
}
