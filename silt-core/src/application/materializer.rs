// silt-core/src/application/materializer.rs

use std::time::Instant;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::model::{IncrementalStrategy, Materialization, SqlModel};
use crate::error::SiltError;
use crate::ports::executor::Executor;

/// What one materialization did, for metadata writes and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOutcome {
    /// "view" | "table" | "incremental": what lands in `model_state`.
    pub materialized_as: String,
    pub row_count: i64,
    pub duration_ms: i64,
}

pub struct Materializer;

impl Materializer {
    /// Builds one model in the warehouse. Failures propagate; callers skip
    /// the metadata writes for this model on error.
    pub async fn materialize(
        executor: &dyn Executor,
        model: &SqlModel,
    ) -> Result<MaterializeOutcome, SiltError> {
        executor
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", model.schema))
            .await?;

        let start = Instant::now();
        let (materialized_as, row_count) = match &model.materialized {
            Materialization::View => {
                let ddl = format!(
                    "CREATE OR REPLACE VIEW {} AS\n{}",
                    model.full_name,
                    model.rendered_query()
                );
                executor.execute(&ddl).await?;
                ("view", 0)
            }
            Materialization::Table => {
                let ddl = format!(
                    "CREATE OR REPLACE TABLE {} AS\n{}",
                    model.full_name,
                    model.rendered_query()
                );
                executor.execute(&ddl).await?;
                let count = executor
                    .query_scalar(&format!("SELECT count(*) FROM {}", model.full_name))
                    .await?;
                ("table", count)
            }
            Materialization::Incremental => {
                let count = Self::materialize_incremental(executor, model).await?;
                ("incremental", count)
            }
        };

        Ok(MaterializeOutcome {
            materialized_as: materialized_as.to_string(),
            row_count,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }

    async fn materialize_incremental(
        executor: &dyn Executor,
        model: &SqlModel,
    ) -> Result<i64, SiltError> {
        let strategy = model.strategy();

        // merge replaces by key; delete+insert degrades to merge without a
        // partition column. Both need the key up front.
        let needs_key = matches!(strategy, IncrementalStrategy::Merge)
            || (matches!(strategy, IncrementalStrategy::DeleteInsert)
                && model.partition_by.is_none());
        if needs_key && model.unique_key.is_none() {
            return Err(SiltError::Domain(DomainError::MissingUniqueKey(
                model.full_name.clone(),
                strategy.as_str().to_string(),
            )));
        }

        let target = &model.full_name;
        let exists = executor.table_exists(&model.schema, &model.name).await?;

        if !exists {
            // First run behaves as a plain table create; the filter is only
            // meaningful once {this} exists.
            debug!("incremental target {target} absent, full create");
            executor
                .execute(&format!(
                    "CREATE TABLE {} AS\n{}",
                    target,
                    model.rendered_query()
                ))
                .await?;
            return executor
                .query_scalar(&format!("SELECT count(*) FROM {target}"))
                .await;
        }

        // Candidate batch, optionally pruned by the author's filter.
        let mut source_sql = model.rendered_query();
        if let Some(filter) = &model.incremental_filter {
            source_sql = format!("{}\n{}", source_sql, filter.replace("{this}", target));
        }

        let staging = format!("{}__{}__staging", model.schema, model.name);
        executor
            .execute(&format!(
                "CREATE OR REPLACE TEMPORARY VIEW {staging} AS\n{source_sql}"
            ))
            .await?;

        let result = Self::apply_incremental(executor, model, strategy, &staging).await;
        // Best effort: the staging view is session-scoped anyway.
        let _ = executor.execute(&format!("DROP VIEW IF EXISTS {staging}")).await;
        result?;

        executor
            .query_scalar(&format!("SELECT count(*) FROM {target}"))
            .await
    }

    async fn apply_incremental(
        executor: &dyn Executor,
        model: &SqlModel,
        strategy: IncrementalStrategy,
        staging: &str,
    ) -> Result<(), SiltError> {
        let target = &model.full_name;

        // Schema evolution: columns new in the batch are added to the target
        // as nullable, in the batch's declared order. Columns only in the
        // target are retained and filled with NULL by column-listed inserts.
        let staging_cols = executor.fetch_columns(staging).await?;
        let target_cols = executor.fetch_columns(target).await?;

        for col in &staging_cols {
            if !target_cols.iter().any(|t| t.name == col.name) {
                executor
                    .execute(&format!(
                        "ALTER TABLE {target} ADD COLUMN {} {}",
                        col.name, col.data_type
                    ))
                    .await?;
            }
        }

        // Write order follows the target column list (post-evolution),
        // restricted to columns the batch actually produces.
        let target_cols = executor.fetch_columns(target).await?;
        let insert_cols: Vec<&str> = target_cols
            .iter()
            .filter(|t| staging_cols.iter().any(|s| s.name == t.name))
            .map(|t| t.name.as_str())
            .collect();
        let col_list = insert_cols.join(", ");
        let insert_sql =
            format!("INSERT INTO {target} ({col_list}) SELECT {col_list} FROM {staging}");

        let statements: Vec<String> = match strategy {
            IncrementalStrategy::Append => vec![insert_sql],
            IncrementalStrategy::Merge => {
                let key = model.unique_key.as_deref().unwrap_or_default();
                vec![
                    format!(
                        "DELETE FROM {target} WHERE {key} IN (SELECT {key} FROM {staging})"
                    ),
                    insert_sql,
                ]
            }
            IncrementalStrategy::DeleteInsert => match &model.partition_by {
                Some(partition) => vec![
                    format!(
                        "DELETE FROM {target} WHERE {partition} IN \
                         (SELECT DISTINCT {partition} FROM {staging})"
                    ),
                    insert_sql,
                ],
                None => {
                    let key = model.unique_key.as_deref().unwrap_or_default();
                    vec![
                        format!(
                            "DELETE FROM {target} WHERE {key} IN (SELECT {key} FROM {staging})"
                        ),
                        insert_sql,
                    ]
                }
            },
        };

        executor.execute_transaction(&statements).await
    }
}
