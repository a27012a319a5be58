//! Time-range predicates
//!
//! The time window is the first predicate of every top-N query. Backends
//! that encode time differently supply their own
//! [`TimeRangePredicateProvider`] when the builder is constructed.

use super::statement::Predicate;

/// Produces the time-window predicate for a bucket range
pub trait TimeRangePredicateProvider: Send + Sync {
    fn time_range_predicate(&self, start_bucket: i64, end_bucket: i64) -> Predicate;
}

impl<F> TimeRangePredicateProvider for F
where
    F: Fn(i64, i64) -> Predicate + Send + Sync,
{
    fn time_range_predicate(&self, start_bucket: i64, end_bucket: i64) -> Predicate {
        self(start_bucket, end_bucket)
    }
}

/// `time_bucket >= start AND time_bucket <= end`, start bound first
#[derive(Debug, Clone)]
pub struct InclusiveBucketRange {
    column: String,
}

impl InclusiveBucketRange {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl TimeRangePredicateProvider for InclusiveBucketRange {
    fn time_range_predicate(&self, start_bucket: i64, end_bucket: i64) -> Predicate {
        Predicate::between_inclusive(&self.column, start_bucket, end_bucket)
    }
}
