// silt-core/src/ports/executor.rs

use crate::error::SiltError;
use async_trait::async_trait;

/// A column as reported by the warehouse catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// The engine's narrow view of the warehouse. DDL and writes are serialized
/// by the adapter's writer mutex; the port stays oblivious to locking.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a statement for its side effects.
    async fn execute(&self, sql: &str) -> Result<(), SiltError>;

    /// Executes statements atomically inside one transaction.
    async fn execute_transaction(&self, statements: &[String]) -> Result<(), SiltError>;

    /// Runs a query expected to yield exactly one integer cell.
    async fn query_scalar(&self, sql: &str) -> Result<i64, SiltError>;

    /// Columns of a relation (table, view, or temp view), in ordinal order.
    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnSchema>, SiltError>;

    /// Whether `schema.name` exists as a base table or view.
    async fn table_exists(&self, schema: &str, name: &str) -> Result<bool, SiltError> {
        let escaped_schema = schema.replace('\'', "''");
        let escaped_name = name.replace('\'', "''");
        let count = self
            .query_scalar(&format!(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = '{escaped_schema}' AND table_name = '{escaped_name}'"
            ))
            .await?;
        Ok(count > 0)
    }
}
