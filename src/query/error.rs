//! Query error types
//!
//! Defines the error conditions surfaced by the query layer.

use super::duration::Step;
use crate::client::ExecutionError;
use thiserror::Error;

/// A top-N query could not be executed
///
/// Wraps whatever the execution backend reported: connection acquisition,
/// statement execution or row traversal. Callers never see partial results
/// alongside this error.
#[derive(Error, Debug)]
#[error("Query execution failed: {source}")]
pub struct QueryExecutionError {
    #[from]
    source: ExecutionError,
}

impl QueryExecutionError {
    /// The backend error that caused the failure
    pub fn execution_error(&self) -> &ExecutionError {
        &self.source
    }

    pub fn into_execution_error(self) -> ExecutionError {
        self.source
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryExecutionError>;

/// Errors building a [`Duration`](super::Duration) from text
#[derive(Error, Debug)]
pub enum DurationError {
    /// Unknown step name
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// A bound did not match the step's input format
    #[error("Invalid time {input:?} for step {step}: {reason}")]
    InvalidTime {
        input: String,
        step: Step,
        reason: String,
    },
}
