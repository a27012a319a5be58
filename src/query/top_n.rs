//! Top-N aggregation queries
//!
//! Ranks the entities of one metric table by the average of a value column
//! over a time-bucket window:
//!
//! ```text
//! SELECT * FROM (
//!   SELECT AVG(<value_column>) AS value, <entity_id>
//!   FROM <metric>
//!   WHERE <time_bucket> >= ? AND <time_bucket> <= ? [AND <key> = ?]...
//!   GROUP BY <entity_id>
//! ) ORDER BY value asc|desc LIMIT <top_n>
//! ```
//!
//! Metric and column names are written into the SQL text and must come
//! from the known metric catalogue, never from end users. Every filter
//! value is bound.

use super::condition::{KeyValue, SelectedRecord, TopNCondition};
use super::duration::Duration;
use super::error::QueryResult;
use super::statement::{BoundStatement, Predicate, PredicateList};
use super::time_range::{InclusiveBucketRange, TimeRangePredicateProvider};
use crate::client::{ExecutionClient, ExecutionResult, QueryConnection};
use serde::{Deserialize, Serialize};

/// Default entity-id column of metric tables
pub const ENTITY_ID: &str = "entity_id";
/// Default time-bucket column of metric tables
pub const TIME_BUCKET: &str = "time_bucket";
/// Alias of the aggregated column in the result set
pub const VALUE_ALIAS: &str = "value";

/// Column names shared by every metric table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSchema {
    #[serde(default = "default_entity_id_column")]
    pub entity_id_column: String,

    #[serde(default = "default_time_bucket_column")]
    pub time_bucket_column: String,
}

fn default_entity_id_column() -> String {
    ENTITY_ID.to_string()
}

fn default_time_bucket_column() -> String {
    TIME_BUCKET.to_string()
}

impl Default for MetricsSchema {
    fn default() -> Self {
        Self {
            entity_id_column: default_entity_id_column(),
            time_bucket_column: default_time_bucket_column(),
        }
    }
}

/// Builds, runs and maps top-N aggregation queries
///
/// Holds no per-query state; one builder can serve concurrent callers as
/// long as the client's connection acquisition is thread-safe.
pub struct TopNQueryBuilder<C> {
    client: C,
    schema: MetricsSchema,
    time_range: Box<dyn TimeRangePredicateProvider>,
}

impl<C: ExecutionClient> TopNQueryBuilder<C> {
    /// Builder over the default schema and inclusive bucket range
    pub fn new(client: C) -> Self {
        Self::with_schema(client, MetricsSchema::default())
    }

    pub fn with_schema(client: C, schema: MetricsSchema) -> Self {
        let time_range = Box::new(InclusiveBucketRange::new(schema.time_bucket_column.clone()));
        Self {
            client,
            schema,
            time_range,
        }
    }

    /// Replace the time-range predicate, for backends that store time
    /// differently
    pub fn with_time_range_provider(
        mut self,
        provider: impl TimeRangePredicateProvider + 'static,
    ) -> Self {
        self.time_range = Box::new(provider);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn schema(&self) -> &MetricsSchema {
        &self.schema
    }

    /// Render the statement for a top-N query without running it
    pub fn build_statement(
        &self,
        condition: &TopNCondition,
        value_column: &str,
        start_bucket: i64,
        end_bucket: i64,
        additional_conditions: &[KeyValue],
    ) -> BoundStatement {
        let mut predicates = PredicateList::new();
        predicates.push(self.time_range.time_range_predicate(start_bucket, end_bucket));
        for kv in additional_conditions {
            predicates.push(Predicate::eq(&kv.key, kv.value.clone()));
        }
        let (where_clause, params) = predicates.render();

        let entity_id = &self.schema.entity_id_column;
        let sql = format!(
            "SELECT * FROM (SELECT AVG({value_column}) AS {VALUE_ALIAS}, {entity_id} \
             FROM {metric} WHERE {where_clause} GROUP BY {entity_id}) \
             ORDER BY {VALUE_ALIAS} {order} LIMIT {limit}",
            metric = condition.name,
            order = condition.order.sql_keyword(),
            limit = condition.top_n,
        );

        BoundStatement { sql, params }
    }

    /// Top-N entities of `condition.name` by average `value_column` over
    /// `duration`
    pub fn sort_metrics(
        &self,
        condition: &TopNCondition,
        value_column: &str,
        duration: &Duration,
        additional_conditions: &[KeyValue],
    ) -> QueryResult<Vec<SelectedRecord>> {
        self.sort_metrics_in_buckets(
            condition,
            value_column,
            duration.start_time_bucket(),
            duration.end_time_bucket(),
            additional_conditions,
        )
    }

    /// Same as [`sort_metrics`](Self::sort_metrics) with explicit bucket
    /// bounds
    pub fn sort_metrics_in_buckets(
        &self,
        condition: &TopNCondition,
        value_column: &str,
        start_bucket: i64,
        end_bucket: i64,
        additional_conditions: &[KeyValue],
    ) -> QueryResult<Vec<SelectedRecord>> {
        let statement = self.build_statement(
            condition,
            value_column,
            start_bucket,
            end_bucket,
            additional_conditions,
        );

        tracing::debug!(
            metric = %condition.name,
            sql = %statement.sql,
            params = statement.params.len(),
            "Executing top-N query"
        );

        match self.fetch(&statement, condition.top_n as usize) {
            Ok(records) => {
                tracing::debug!(
                    metric = %condition.name,
                    records = records.len(),
                    "Top-N query complete"
                );
                Ok(records)
            }
            Err(e) => {
                tracing::warn!(metric = %condition.name, "Top-N query failed: {}", e);
                Err(e.into())
            }
        }
    }

    fn fetch(&self, statement: &BoundStatement, limit: usize) -> ExecutionResult<Vec<SelectedRecord>> {
        let entity_id = self.schema.entity_id_column.as_str();
        let mut records = Vec::new();

        // Connection goes back to the client when `conn` drops, on every path
        let mut conn = self.client.acquire_connection()?;
        conn.execute_query(&statement.sql, &statement.params, &mut |row| {
            if records.len() < limit {
                records.push(SelectedRecord {
                    id: row.get_string(entity_id)?,
                    value: row.get_string(VALUE_ALIAS)?,
                });
            }
            Ok(())
        })?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ExecutionError, ResultRow, SqliteClient};
    use crate::query::{BindValue, Order, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    type FakeRowData = Vec<(&'static str, &'static str)>;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum FailAt {
        Acquire,
        Execute,
        Row(usize),
    }

    /// Records statements and replays canned rows
    #[derive(Default)]
    struct FakeClient {
        rows: Vec<FakeRowData>,
        fail: Option<FailAt>,
        executed: Mutex<Vec<BoundStatement>>,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl FakeClient {
        fn with_rows(rows: Vec<FakeRowData>) -> Self {
            Self {
                rows,
                ..Default::default()
            }
        }

        fn failing(fail: FailAt, rows: Vec<FakeRowData>) -> Self {
            Self {
                rows,
                fail: Some(fail),
                ..Default::default()
            }
        }

        fn last_statement(&self) -> BoundStatement {
            self.executed.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct FakeConnection<'a> {
        client: &'a FakeClient,
    }

    impl Drop for FakeConnection<'_> {
        fn drop(&mut self) {
            self.client.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeRow<'a>(&'a FakeRowData);

    impl ResultRow for FakeRow<'_> {
        fn get_string(&self, column: &str) -> ExecutionResult<String> {
            self.0
                .iter()
                .find(|(name, _)| *name == column)
                .map(|(_, value)| value.to_string())
                .ok_or_else(|| ExecutionError::ColumnNotFound(column.to_string()))
        }
    }

    impl QueryConnection for FakeConnection<'_> {
        fn execute_query(
            &mut self,
            sql: &str,
            params: &[BindValue],
            on_row: &mut dyn FnMut(&dyn ResultRow) -> ExecutionResult<()>,
        ) -> ExecutionResult<()> {
            self.client.executed.lock().unwrap().push(BoundStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
            });

            if self.client.fail == Some(FailAt::Execute) {
                return Err(ExecutionError::Connection("connection refused".to_string()));
            }

            for (idx, row) in self.client.rows.iter().enumerate() {
                if self.client.fail == Some(FailAt::Row(idx)) {
                    return Err(ExecutionError::Result("I/O fault while reading".to_string()));
                }
                on_row(&FakeRow(row))?;
            }
            Ok(())
        }
    }

    impl ExecutionClient for FakeClient {
        type Connection<'a> = FakeConnection<'a>;

        fn acquire_connection(&self) -> ExecutionResult<FakeConnection<'_>> {
            if self.fail == Some(FailAt::Acquire) {
                return Err(ExecutionError::Connection("pool exhausted".to_string()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConnection { client: self })
        }
    }

    fn row(id: &'static str, value: &'static str) -> FakeRowData {
        vec![("value", value), ("entity_id", id)]
    }

    fn scenario_condition() -> TopNCondition {
        TopNCondition::new("service_resp_time", 5, Order::Desc)
    }

    #[test]
    fn test_scenario_statement() {
        let builder = TopNQueryBuilder::new(FakeClient::default());
        let stmt = builder.build_statement(&scenario_condition(), "avg", 20230101, 20230102, &[]);

        assert_eq!(
            stmt.sql,
            "SELECT * FROM (SELECT AVG(avg) AS value, entity_id FROM service_resp_time \
             WHERE time_bucket >= ? AND time_bucket <= ? GROUP BY entity_id) \
             ORDER BY value desc LIMIT 5"
        );
        assert_eq!(
            stmt.params,
            vec![BindValue::Integer(20230101), BindValue::Integer(20230102)]
        );
        assert_eq!(stmt.placeholder_count(), stmt.params.len());
    }

    #[test]
    fn test_filters_follow_time_range_in_order() {
        let builder = TopNQueryBuilder::new(FakeClient::default());
        let filters = vec![
            KeyValue::new("service_id", "svc-1"),
            KeyValue::new("layer", "MESH"),
            KeyValue::new("service_id", "svc-1"),
        ];
        let stmt = builder.build_statement(&scenario_condition(), "avg", 1, 2, &filters);

        assert!(stmt.sql.contains(
            "WHERE time_bucket >= ? AND time_bucket <= ? AND service_id = ? AND layer = ? AND service_id = ? GROUP BY"
        ));
        assert_eq!(
            stmt.params,
            vec![
                BindValue::Integer(1),
                BindValue::Integer(2),
                BindValue::from("svc-1"),
                BindValue::from("MESH"),
                BindValue::from("svc-1"),
            ]
        );
        assert_eq!(stmt.placeholder_count(), 5);
    }

    #[test]
    fn test_filter_values_are_bound_not_inlined() {
        let builder = TopNQueryBuilder::new(FakeClient::default());
        let filters = vec![KeyValue::new("service_id", "x' OR '1'='1")];
        let stmt = builder.build_statement(&scenario_condition(), "avg", 1, 2, &filters);

        assert!(!stmt.sql.contains("OR '1'='1"));
        assert_eq!(stmt.params[2], BindValue::from("x' OR '1'='1"));
    }

    #[test]
    fn test_order_direction() {
        let builder = TopNQueryBuilder::new(FakeClient::default());

        let asc = TopNCondition::new("service_cpm", 3, Order::Asc);
        let stmt = builder.build_statement(&asc, "value", 1, 2, &[]);
        assert!(stmt.sql.contains("ORDER BY value asc"));

        let desc = TopNCondition::new("service_cpm", 3, Order::from_str_lossy("unknown"));
        let stmt = builder.build_statement(&desc, "value", 1, 2, &[]);
        assert!(stmt.sql.contains("ORDER BY value desc"));
    }

    #[test]
    fn test_limit_is_literal_top_n() {
        let builder = TopNQueryBuilder::new(FakeClient::default());
        for top_n in [1u32, 7, 250] {
            let condition = TopNCondition::new("service_cpm", top_n, Order::Desc);
            let stmt = builder.build_statement(&condition, "value", 1, 2, &[]);
            assert!(stmt.sql.ends_with(&format!("LIMIT {}", top_n)));
            assert_eq!(stmt.params.len(), 2);
        }
    }

    #[test]
    fn test_custom_schema_columns() {
        let schema = MetricsSchema {
            entity_id_column: "instance_id".to_string(),
            time_bucket_column: "bucket".to_string(),
        };
        let builder = TopNQueryBuilder::with_schema(FakeClient::default(), schema);
        let stmt = builder.build_statement(&scenario_condition(), "avg", 1, 2, &[]);

        assert!(stmt.sql.contains("AS value, instance_id FROM"));
        assert!(stmt.sql.contains("WHERE bucket >= ? AND bucket <= ?"));
        assert!(stmt.sql.contains("GROUP BY instance_id)"));
    }

    #[test]
    fn test_custom_time_range_provider() {
        let builder = TopNQueryBuilder::new(FakeClient::default()).with_time_range_provider(
            |start: i64, end: i64| {
                Predicate::new("ts BETWEEN ? AND ?", vec![(start * 60).into(), (end * 60).into()])
            },
        );
        let filters = vec![KeyValue::new("layer", "GENERAL")];
        let stmt = builder.build_statement(&scenario_condition(), "avg", 1, 2, &filters);

        assert!(stmt.sql.contains("WHERE ts BETWEEN ? AND ? AND layer = ? GROUP BY"));
        assert_eq!(
            stmt.params,
            vec![
                BindValue::Integer(60),
                BindValue::Integer(120),
                BindValue::from("GENERAL"),
            ]
        );
    }

    #[test]
    fn test_rows_mapped_in_cursor_order() {
        let client = FakeClient::with_rows(vec![row("svcA", "12.5"), row("svcB", "9.0")]);
        let builder = TopNQueryBuilder::new(client);

        let records = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[])
            .unwrap();

        assert_eq!(
            records,
            vec![
                SelectedRecord {
                    id: "svcA".to_string(),
                    value: "12.5".to_string()
                },
                SelectedRecord {
                    id: "svcB".to_string(),
                    value: "9.0".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_rows_not_resorted() {
        // Ascending values under a DESC request come back untouched
        let client = FakeClient::with_rows(vec![row("a", "1"), row("b", "2"), row("c", "3")]);
        let builder = TopNQueryBuilder::new(client);

        let ids: Vec<String> = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[])
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_result_never_exceeds_top_n() {
        let rows = (0..10).map(|_| row("svc", "1.0")).collect();
        let builder = TopNQueryBuilder::new(FakeClient::with_rows(rows));
        let condition = TopNCondition::new("service_cpm", 3, Order::Desc);

        let records = builder
            .sort_metrics_in_buckets(&condition, "value", 1, 2, &[])
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_sort_metrics_uses_duration_buckets() {
        let builder = TopNQueryBuilder::new(FakeClient::default());
        let duration = Duration::parse("2023-01-01 0800", "2023-01-01 0930", Step::Minute).unwrap();

        let records = builder
            .sort_metrics(&scenario_condition(), "avg", &duration, &[KeyValue::new("layer", 1i64)])
            .unwrap();
        assert!(records.is_empty());

        let stmt = builder.client().last_statement();
        assert_eq!(
            stmt.params,
            vec![
                BindValue::Integer(202301010800),
                BindValue::Integer(202301010930),
                BindValue::Integer(1),
            ]
        );
    }

    #[test]
    fn test_execution_failure_propagates() {
        let client = FakeClient::failing(FailAt::Execute, vec![row("svcA", "1")]);
        let builder = TopNQueryBuilder::new(client);

        let err = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[])
            .unwrap_err();

        assert!(matches!(err.execution_error(), ExecutionError::Connection(_)));
        let client = builder.client();
        assert_eq!(client.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(client.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_failure_propagates() {
        let builder = TopNQueryBuilder::new(FakeClient::failing(FailAt::Acquire, vec![]));

        let err = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[])
            .unwrap_err();

        assert!(err.to_string().contains("pool exhausted"));
        assert!(builder.client().executed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mid_traversal_failure_returns_no_records() {
        let rows = vec![row("svcA", "3"), row("svcB", "2"), row("svcC", "1")];
        let builder = TopNQueryBuilder::new(FakeClient::failing(FailAt::Row(2), rows));

        let result = builder.sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[]);

        assert!(matches!(
            result.unwrap_err().execution_error(),
            ExecutionError::Result(_)
        ));
        assert_eq!(builder.client().released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_column_is_execution_error() {
        let client = FakeClient::with_rows(vec![vec![("entity_id", "svcA")]]);
        let builder = TopNQueryBuilder::new(client);

        let err = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 1, 2, &[])
            .unwrap_err();
        assert!(matches!(
            err.execution_error(),
            ExecutionError::ColumnNotFound(c) if c == "value"
        ));
    }

    #[test]
    fn test_builder_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TopNQueryBuilder<SqliteClient>>();
    }

    fn seeded_store(dir: &std::path::Path) -> SqliteClient {
        let client = SqliteClient::open(dir.join("metrics.db"), 2).unwrap();
        client
            .create_metric_table("service_resp_time", ENTITY_ID, TIME_BUCKET, "avg", &["layer"])
            .unwrap();

        let rows: [(&str, i64, f64, &str); 6] = [
            ("svc-a", 20230101, 10.0, "MESH"),
            ("svc-a", 20230102, 20.0, "MESH"),
            ("svc-b", 20230101, 30.0, "GENERAL"),
            ("svc-c", 20230102, 5.0, "MESH"),
            ("svc-c", 20230103, 100.0, "MESH"),
            ("svc-d", 20221231, 1000.0, "GENERAL"),
        ];
        for (entity, bucket, value, layer) in rows {
            client
                .insert_metric_row(
                    "service_resp_time",
                    &[ENTITY_ID, TIME_BUCKET, "avg", "layer"],
                    &[entity.into(), bucket.into(), value.into(), layer.into()],
                )
                .unwrap();
        }
        client
    }

    fn ids_and_values(records: &[SelectedRecord]) -> Vec<(&str, &str)> {
        records
            .iter()
            .map(|r| (r.id.as_str(), r.value.as_str()))
            .collect()
    }

    #[test]
    fn test_sqlite_top_n_descending() {
        let dir = tempdir().unwrap();
        let builder = TopNQueryBuilder::new(seeded_store(dir.path()));
        let condition = TopNCondition::new("service_resp_time", 2, Order::Desc);

        let records = builder
            .sort_metrics_in_buckets(&condition, "avg", 20230101, 20230102, &[])
            .unwrap();

        assert_eq!(
            ids_and_values(&records),
            vec![("svc-b", "30.0"), ("svc-a", "15.0")]
        );
    }

    #[test]
    fn test_concurrent_queries_share_pool() {
        let dir = tempdir().unwrap();
        let builder = TopNQueryBuilder::new(seeded_store(dir.path()));
        let condition = TopNCondition::new("service_resp_time", 2, Order::Desc);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..5)
                            .map(|_| {
                                builder.sort_metrics_in_buckets(
                                    &condition,
                                    "avg",
                                    20230101,
                                    20230102,
                                    &[],
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(results.len(), 40);
        for result in &results {
            let records = result.as_ref().unwrap();
            assert_eq!(
                ids_and_values(records),
                vec![("svc-b", "30.0"), ("svc-a", "15.0")]
            );
        }
        // Max idle for the seeded store is 2
        assert!(builder.client().idle_connections() <= 2);
        assert!(builder.client().idle_connections() >= 1);
    }

    #[test]
    fn test_sqlite_top_n_ascending_with_filter() {
        let dir = tempdir().unwrap();
        let builder = TopNQueryBuilder::new(seeded_store(dir.path()));
        let condition = TopNCondition::new("service_resp_time", 5, Order::Asc);
        let duration = Duration::parse("2023-01-01", "2023-01-02", Step::Day).unwrap();

        let records = builder
            .sort_metrics(&condition, "avg", &duration, &[KeyValue::new("layer", "MESH")])
            .unwrap();

        assert_eq!(
            ids_and_values(&records),
            vec![("svc-c", "5.0"), ("svc-a", "15.0")]
        );
    }

    #[test]
    fn test_sqlite_empty_window() {
        let dir = tempdir().unwrap();
        let builder = TopNQueryBuilder::new(seeded_store(dir.path()));

        let records = builder
            .sort_metrics_in_buckets(&scenario_condition(), "avg", 20240101, 20240131, &[])
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_sqlite_unknown_metric_fails() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let builder = TopNQueryBuilder::new(store);
        let condition = TopNCondition::new("no_such_metric", 5, Order::Desc);

        let err = builder
            .sort_metrics_in_buckets(&condition, "avg", 1, 2, &[])
            .unwrap_err();

        assert!(matches!(err.execution_error(), ExecutionError::Sqlite(_)));
        // Connection went back to the pool despite the failure
        assert_eq!(builder.client().idle_connections(), 1);
    }
}
