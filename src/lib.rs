//! # metrics-topn
//!
//! Top-N aggregation queries over a relational time-series metrics store.
//! Given a metric, a time window and optional equality filters, returns the
//! entities ranked by the average of a value column.
//!
//! ## Modules
//!
//! - [`query`]: Query intent types, statement assembly and the top-N builder
//! - [`client`]: Execution collaborators (scoped connections, row access)
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metrics_topn::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let client = SqliteClient::from_config(&config.storage)?;
//!     let builder = TopNQueryBuilder::with_schema(client, config.schema);
//!
//!     // Five slowest services on the first of January
//!     let condition = TopNCondition::new("service_resp_time", 5, Order::Desc);
//!     let records = builder.sort_metrics_in_buckets(&condition, "avg", 20230101, 20230101, &[])?;
//!
//!     println!("Found {} services", records.len());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod query;

pub use client::{
    ExecutionClient, ExecutionError, ExecutionResult, PooledConnection, QueryConnection,
    ResultRow, SqliteClient,
};

pub use query::{
    BindValue, BoundStatement, Duration, DurationError, KeyValue, MetricsSchema, Order,
    Predicate, QueryExecutionError, QueryResult, SelectedRecord, Step, TimeRangePredicateProvider,
    TopNCondition, TopNQueryBuilder,
};

pub use config::{Config, ConfigError, LoggingConfig, StorageConfig};
