//! SQLite execution client
//!
//! Opens connections to a single database file and keeps up to
//! `max_idle_connections` of them around for reuse. A [`PooledConnection`]
//! hands its connection back to the pool when dropped.

use super::{ExecutionError, ExecutionResult, ExecutionClient, QueryConnection, ResultRow};
use crate::config::StorageConfig;
use crate::query::BindValue;
use rusqlite::types::{Null, ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// rusqlite-backed [`ExecutionClient`]
pub struct SqliteClient {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
}

impl SqliteClient {
    /// Open (or create) the database at `path`
    ///
    /// One connection is opened eagerly so a bad path fails here rather than
    /// on the first query.
    pub fn open(path: impl AsRef<Path>, max_idle: usize) -> ExecutionResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ExecutionError::Connection(format!(
                        "Failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let client = Self {
            path,
            idle: Mutex::new(Vec::new()),
            max_idle: max_idle.max(1),
        };

        let conn = client.open_connection()?;
        client.release(conn);

        tracing::debug!("Opened SQLite metrics store at {:?}", client.path);
        Ok(client)
    }

    /// Open the database described by the `[storage]` config section
    pub fn from_config(config: &StorageConfig) -> ExecutionResult<Self> {
        Self::open(&config.database_path, config.max_idle_connections)
    }

    fn open_connection(&self) -> ExecutionResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.max_idle => {
                idle.push(conn);
                tracing::trace!("Returned connection to pool ({} idle)", idle.len());
            }
            // Pool is full or poisoned: dropping closes the connection
            _ => {}
        }
    }

    /// Number of connections currently parked in the pool
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a metric table with the entity-id, time-bucket and value
    /// columns, plus any extra text columns usable as filters
    pub fn create_metric_table(
        &self,
        metric_name: &str,
        entity_id_column: &str,
        time_bucket_column: &str,
        value_column: &str,
        extra_columns: &[&str],
    ) -> ExecutionResult<()> {
        let mut columns = vec![
            format!("{} TEXT NOT NULL", entity_id_column),
            format!("{} INTEGER NOT NULL", time_bucket_column),
            format!("{} REAL", value_column),
        ];
        columns.extend(extra_columns.iter().map(|c| format!("{} TEXT", c)));

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            metric_name,
            columns.join(", ")
        );
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_{1} ON {0}({1})",
            metric_name, time_bucket_column
        );

        let conn = self.acquire_connection()?;
        let conn = conn.inner()?;
        conn.execute(&sql, [])?;
        conn.execute(&index, [])?;
        Ok(())
    }

    /// Insert one row into a metric table
    pub fn insert_metric_row(
        &self,
        metric_name: &str,
        columns: &[&str],
        values: &[BindValue],
    ) -> ExecutionResult<()> {
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            metric_name,
            columns.join(", "),
            placeholders
        );

        let conn = self.acquire_connection()?;
        conn.inner()?
            .prepare_cached(&sql)?
            .execute(params_from_iter(values.iter()))?;
        Ok(())
    }
}

impl ExecutionClient for SqliteClient {
    type Connection<'a> = PooledConnection<'a>;

    fn acquire_connection(&self) -> ExecutionResult<PooledConnection<'_>> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| ExecutionError::Connection("Connection pool lock poisoned".to_string()))?
            .pop();

        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::trace!("Pool empty, opening new connection to {:?}", self.path);
                self.open_connection()?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            client: self,
        })
    }
}

/// Connection checked out of a [`SqliteClient`]
///
/// Returned to the pool on drop.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    client: &'a SqliteClient,
}

impl PooledConnection<'_> {
    fn inner(&self) -> ExecutionResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| ExecutionError::Connection("Connection already released".to_string()))
    }
}

impl QueryConnection for PooledConnection<'_> {
    fn execute_query(
        &mut self,
        sql: &str,
        params: &[BindValue],
        on_row: &mut dyn FnMut(&dyn ResultRow) -> ExecutionResult<()>,
    ) -> ExecutionResult<()> {
        let conn = self.inner()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        while let Some(row) = rows.next()? {
            on_row(&SqliteRow(row))?;
        }

        Ok(())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.client.release(conn);
        }
    }
}

struct SqliteRow<'r, 's>(&'r rusqlite::Row<'s>);

impl ResultRow for SqliteRow<'_, '_> {
    fn get_string(&self, column: &str) -> ExecutionResult<String> {
        let value: Value = self.0.get(column).map_err(|e| match e {
            rusqlite::Error::InvalidColumnName(name) => ExecutionError::ColumnNotFound(name),
            other => ExecutionError::Sqlite(other),
        })?;

        Ok(match value {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => real_to_text(f),
            Value::Text(s) => s,
            Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        })
    }
}

/// Render a REAL the way SQLite's own text conversion does (`%!.15g`)
///
/// 15 significant digits, trailing zeros dropped but at least one digit
/// after the point, exponent form `1.0e+20` outside `1e-4 ..= 1e15`.
fn real_to_text(f: f64) -> String {
    if f.is_nan() {
        return String::new();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if f == 0.0 {
        return "0.0".to_string();
    }

    // d.dddddddddddddde<exp>, already rounded to 15 significant digits
    let sci = format!("{:.14e}", f.abs());
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let sign = if f < 0.0 { "-" } else { "" };

    if !(-4..15).contains(&exp) {
        let frac = digits[1..].trim_end_matches('0');
        let frac = if frac.is_empty() { "0" } else { frac };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}.{}e{}{:02}", sign, &digits[..1], frac, exp_sign, exp.abs());
    }

    let (int_part, frac) = if exp >= 0 {
        let split = exp as usize + 1;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        let zeros = "0".repeat((-exp - 1) as usize);
        ("0".to_string(), format!("{}{}", zeros, digits))
    };
    let frac = frac.trim_end_matches('0');
    let frac = if frac.is_empty() { "0" } else { frac };

    format!("{}{}.{}", sign, int_part, frac)
}

impl ToSql for BindValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            BindValue::Integer(i) => ToSqlOutput::from(*i),
            BindValue::Real(f) => ToSqlOutput::from(*f),
            BindValue::Text(s) => ToSqlOutput::from(s.as_str()),
            BindValue::Bool(b) => ToSqlOutput::from(*b),
            BindValue::Null => ToSqlOutput::from(Null),
        })
    }
}
