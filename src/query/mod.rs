//! Top-N Query Engine
//!
//! Turns a ranking request into one parameterized SQL statement and maps
//! the rows that come back:
//!
//! - **Condition**: what to rank (`TopNCondition`, `KeyValue` filters)
//! - **Duration**: wall-clock window → integer time buckets
//! - **Statement**: ordered predicates with their bind values
//! - **TopN**: the builder that renders, executes and maps
//!
//! # Example
//!
//! ```rust,no_run
//! use metrics_topn::client::SqliteClient;
//! use metrics_topn::query::{Duration, KeyValue, Order, Step, TopNCondition, TopNQueryBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let builder = TopNQueryBuilder::new(SqliteClient::open("metrics.db", 4)?);
//!
//! let condition = TopNCondition::new("service_resp_time", 5, Order::Desc);
//! let duration = Duration::parse("2023-01-01", "2023-01-02", Step::Day)?;
//! let records = builder.sort_metrics(
//!     &condition,
//!     "avg",
//!     &duration,
//!     &[KeyValue::new("layer", "GENERAL")],
//! )?;
//!
//! for record in records {
//!     println!("{} {}", record.id, record.value);
//! }
//! # Ok(())
//! # }
//! ```

mod condition;
mod duration;
mod error;
mod statement;
mod time_range;
mod top_n;

pub use condition::{BindValue, KeyValue, Order, SelectedRecord, TopNCondition};
pub use duration::{Duration, Step};
pub use error::{DurationError, QueryExecutionError, QueryResult};
pub use statement::{BoundStatement, Predicate, PredicateList, PREDICATE_SEPARATOR};
pub use time_range::{InclusiveBucketRange, TimeRangePredicateProvider};
pub use top_n::{MetricsSchema, TopNQueryBuilder, ENTITY_ID, TIME_BUCKET, VALUE_ALIAS};
