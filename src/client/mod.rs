//! Execution Collaborators
//!
//! The query layer never talks to a database directly. It acquires a scoped
//! connection from an [`ExecutionClient`], runs one parameterized statement
//! on it and reads the result through [`ResultRow`].
//!
//! ```text
//! acquire_connection() ──► PooledConnection ──► execute_query(sql, params)
//!        │                        │                     │
//!        │                        └── Drop: release ◄───┘ (every exit path)
//! ```
//!
//! - **SqliteClient**: rusqlite-backed client with a small idle-connection pool

mod sqlite;

pub use sqlite::{PooledConnection, SqliteClient};

use crate::query::BindValue;
use thiserror::Error;

/// Errors raised by an execution backend
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Could not open or hand out a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The SQLite engine rejected or failed the statement
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A result row did not carry the requested column
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Row traversal failed in a backend-specific way
    #[error("Result error: {0}")]
    Result(String),
}

/// Result type for execution backends
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Read access to a single row of a tabular result
pub trait ResultRow {
    /// Read a column by name, rendered as text
    fn get_string(&self, column: &str) -> ExecutionResult<String>;
}

/// A connection able to run one parameterized statement
pub trait QueryConnection {
    /// Execute `sql` with positional `params` and feed every row to `on_row`
    /// in the order the engine produces them.
    ///
    /// The first error, from the engine or from `on_row`, stops traversal and
    /// is returned.
    fn execute_query(
        &mut self,
        sql: &str,
        params: &[BindValue],
        on_row: &mut dyn FnMut(&dyn ResultRow) -> ExecutionResult<()>,
    ) -> ExecutionResult<()>;
}

/// Source of scoped connections
///
/// Implementations release the connection when the returned value is
/// dropped, so release happens on success and on every error path.
pub trait ExecutionClient: Send + Sync {
    type Connection<'a>: QueryConnection
    where
        Self: 'a;

    /// Acquire a connection for the duration of one query
    fn acquire_connection(&self) -> ExecutionResult<Self::Connection<'_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExecutionError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "Connection error: connection refused");

        let err = ExecutionError::ColumnNotFound("value".to_string());
        assert_eq!(err.to_string(), "Column not found: value");
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidQuery;
        let err: ExecutionError = sqlite_err.into();
        assert!(matches!(err, ExecutionError::Sqlite(_)));
    }
}
