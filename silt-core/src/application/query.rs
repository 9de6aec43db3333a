// silt-core/src/application/query.rs
//
// The ad-hoc query surface consumed by CLI/HTTP collaborators: bounded
// result sets, a read-only guard, and a wall-clock timeout around the
// statement.

use std::time::Duration;
use tracing::warn;

use crate::error::SiltError;
use crate::infrastructure::warehouse::Warehouse;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_ROW_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub read_only: bool,
    pub timeout_s: u64,
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            timeout_s: DEFAULT_TIMEOUT_SECONDS,
            limit: DEFAULT_ROW_LIMIT,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub truncated: bool,
}

const READ_PREFIXES: &[&str] = &[
    "select", "with", "explain", "describe", "show", "summarize", "from",
];

fn is_read_statement(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    READ_PREFIXES.contains(&head.as_str())
}

/// Runs one statement with a row cap and a wall-clock timeout. In
/// `read_only` mode anything that is not a read statement is rejected
/// before touching the warehouse.
pub async fn run_query(
    warehouse: &Warehouse,
    sql: &str,
    options: QueryOptions,
) -> Result<QueryOutput, SiltError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(SiltError::Internal("empty SQL query".into()));
    }
    if options.read_only && !is_read_statement(sql) {
        return Err(SiltError::Internal(
            "only read statements are allowed on the read-only surface".into(),
        ));
    }

    let warehouse = warehouse.clone();
    let owned_sql = sql.to_string();
    let limit = options.limit;
    let handle = tokio::task::spawn_blocking(move || {
        // Fetch one past the cap to report truncation honestly.
        warehouse.query_rows(&owned_sql, limit + 1)
    });

    let joined = tokio::time::timeout(Duration::from_secs(options.timeout_s), handle).await;
    match joined {
        Err(_) => {
            // The blocking task finishes on its own; its result is dropped.
            warn!("query timed out after {}s", options.timeout_s);
            Err(SiltError::Timeout {
                seconds: options.timeout_s,
            })
        }
        Ok(Err(join_err)) => Err(SiltError::Internal(format!("query task failed: {join_err}"))),
        Ok(Ok(result)) => {
            let (columns, mut rows) = result?;
            let truncated = rows.len() > limit;
            rows.truncate(limit);
            Ok(QueryOutput {
                columns,
                rows,
                truncated,
            })
        }
    }
}
