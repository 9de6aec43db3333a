// silt-core/src/infrastructure/warehouse.rs

use async_trait::async_trait;
use duckdb::{AccessMode, Config, Connection};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::SiltError;
use crate::infrastructure::error::{DatabaseError, InfrastructureError};
use crate::ports::executor::{ColumnSchema, Executor};

/// The embedded warehouse. One writer connection behind a mutex: DuckDB
/// does not support concurrent writers, so every DDL and metadata write in
/// the process serializes through this lock. Clones share the connection.
#[derive(Clone)]
pub struct Warehouse {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

fn db_err(e: duckdb::Error) -> SiltError {
    SiltError::Infrastructure(InfrastructureError::Database(DatabaseError::DuckDb(e)))
}

fn poisoned() -> SiltError {
    SiltError::Infrastructure(InfrastructureError::Io(std::io::Error::other(
        "Warehouse mutex poisoned",
    )))
}

impl Warehouse {
    pub fn open(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default();
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(db_path, config)?
        };
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_string(),
        })
    }

    pub fn in_memory() -> Result<Self, InfrastructureError> {
        Self::open(":memory:")
    }

    /// A second, read-only connection against the same file. Used by the
    /// ad-hoc query surface so reads never contend with the writer mutex.
    pub fn open_read_only(db_path: &str) -> Result<Self, InfrastructureError> {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Runs `f` while holding the writer lock. The single funnel for raw
    /// connection access inside the crate.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, duckdb::Error>,
    ) -> Result<T, SiltError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        f(&conn).map_err(db_err)
    }

    pub fn ensure_schema(&self, schema: &str) -> Result<(), SiltError> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
        })
    }

    /// Flushes the WAL. Failures are logged, not propagated.
    pub fn checkpoint(&self) {
        if let Err(e) = self.with_conn(|conn| conn.execute_batch("CHECKPOINT")) {
            warn!("CHECKPOINT failed: {e}");
        }
    }

    /// Runs a query and decodes every cell to JSON. Bounded by `limit`.
    pub fn query_rows(
        &self,
        sql: &str,
        limit: usize,
    ) -> Result<(Vec<String>, Vec<Vec<serde_json::Value>>), SiltError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;

            let columns: Vec<String> = rows
                .as_ref()
                .map(|r| r.column_names().iter().map(|c| c.to_string()).collect())
                .unwrap_or_default();
            let width = columns.len();

            let mut out: Vec<Vec<serde_json::Value>> = Vec::new();
            while let Some(row) = rows.next()? {
                if out.len() >= limit {
                    break;
                }
                let mut decoded = Vec::with_capacity(width);
                for idx in 0..width {
                    decoded.push(decode_cell(row, idx));
                }
                out.push(decoded);
            }
            Ok((columns, out))
        })
    }
}

/// Best-effort cell decoding: integers, floats, booleans, then text.
/// Anything the ladder cannot read comes back as null.
fn decode_cell(row: &duckdb::Row<'_>, idx: usize) -> serde_json::Value {
    if let Ok(v) = row.get::<_, Option<i64>>(idx) {
        return match v {
            Some(n) => serde_json::Value::from(n),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<f64>>(idx) {
        return match v {
            Some(n) => serde_json::Value::from(n),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<bool>>(idx) {
        return match v {
            Some(b) => serde_json::Value::from(b),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.get::<_, Option<String>>(idx) {
        return match v {
            Some(s) => serde_json::Value::from(s),
            None => serde_json::Value::Null,
        };
    }
    debug!("cell {idx} not decodable, returning null");
    serde_json::Value::Null
}

#[async_trait]
impl Executor for Warehouse {
    async fn execute(&self, sql: &str) -> Result<(), SiltError> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }

    async fn execute_transaction(&self, statements: &[String]) -> Result<(), SiltError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        conn.execute_batch("BEGIN TRANSACTION").map_err(db_err)?;
        for sql in statements {
            if let Err(e) = conn.execute_batch(sql) {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(db_err(e));
            }
        }
        conn.execute_batch("COMMIT").map_err(db_err)
    }

    async fn query_scalar(&self, sql: &str) -> Result<i64, SiltError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => row.get(0),
                None => Err(duckdb::Error::QueryReturnedNoRows),
            }
        })
    }

    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnSchema>, SiltError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info('{table}')"))?;
            let rows = stmt.query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get("name")?,
                    data_type: row.get("type")?,
                    is_nullable: !row.get::<_, bool>("notnull")?,
                })
            })?;
            let mut columns = Vec::new();
            for row in rows {
                columns.push(row?);
            }
            Ok(columns)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_and_fetch_columns() {
        let wh = Warehouse::in_memory().expect("in-memory warehouse");
        wh.execute("CREATE TABLE users (id INTEGER, name VARCHAR, age INTEGER)")
            .await
            .expect("create table");
        wh.execute("INSERT INTO users VALUES (1, 'Alice', 30)")
            .await
            .expect("insert");

        let columns = wh.fetch_columns("users").await.expect("columns");
        assert_eq!(columns.len(), 3);
        let name = columns.iter().find(|c| c.name == "name").unwrap();
        assert_eq!(name.data_type, "VARCHAR");
    }

    #[tokio::test]
    async fn test_query_scalar_and_rows() {
        let wh = Warehouse::in_memory().unwrap();
        wh.execute("CREATE TABLE t AS SELECT 1 AS id UNION ALL SELECT 2")
            .await
            .unwrap();

        let count = wh.query_scalar("SELECT count(*) FROM t").await.unwrap();
        assert_eq!(count, 2);

        let (cols, rows) = wh.query_rows("SELECT id FROM t ORDER BY id", 10).unwrap();
        assert_eq!(cols, vec!["id"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], serde_json::Value::from(1));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let wh = Warehouse::in_memory().unwrap();
        wh.execute("CREATE TABLE t (id INTEGER)").await.unwrap();

        let result = wh
            .execute_transaction(&[
                "INSERT INTO t VALUES (1)".to_string(),
                "INSERT INTO missing_table VALUES (2)".to_string(),
            ])
            .await;
        assert!(result.is_err());

        let count = wh.query_scalar("SELECT count(*) FROM t").await.unwrap();
        assert_eq!(count, 0, "aborted transaction must leave no rows behind");
    }

    #[tokio::test]
    async fn test_table_exists() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute("CREATE TABLE gold.dim AS SELECT 1 AS id")
            .await
            .unwrap();

        assert!(wh.table_exists("gold", "dim").await.unwrap());
        assert!(!wh.table_exists("gold", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_error_on_bad_sql() {
        let wh = Warehouse::in_memory().unwrap();
        assert!(wh.execute("SELECT * FROM nope").await.is_err());
    }
}
