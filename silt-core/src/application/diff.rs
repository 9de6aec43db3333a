// silt-core/src/application/diff.rs
//
// "What would change if I ran this now?" Renders a model's query into a
// disposable temp view and compares it against the materialized table.

use std::path::Path;

use crate::domain::model::SqlModel;
use crate::error::SiltError;
use crate::infrastructure::discovery::ModelDiscovery;
use crate::infrastructure::warehouse::Warehouse;
use crate::ports::executor::Executor;

const SAMPLE_ROWS: usize = 5;
const FULL_SAMPLE_ROWS: usize = 1000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaChange {
    pub column: String,
    /// "added" | "removed" | "type_changed"
    pub change_type: String,
    pub detail: String,
}

#[derive(Debug, serde::Serialize)]
pub struct DiffReport {
    pub model: String,
    pub added: i64,
    pub removed: i64,
    pub modified: i64,
    pub total_before: i64,
    pub total_after: i64,
    pub is_new: bool,
    pub schema_changes: Vec<SchemaChange>,
    pub sample_added: Vec<Vec<serde_json::Value>>,
    pub sample_removed: Vec<Vec<serde_json::Value>>,
    pub error: Option<String>,
}

impl DiffReport {
    fn empty(model: &str) -> Self {
        Self {
            model: model.to_string(),
            added: 0,
            removed: 0,
            modified: 0,
            total_before: 0,
            total_after: 0,
            is_new: false,
            schema_changes: vec![],
            sample_added: vec![],
            sample_removed: vec![],
            error: None,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.is_new
            || self.added != 0
            || self.removed != 0
            || self.modified != 0
            || !self.schema_changes.is_empty()
    }
}

/// The key used to pair rows across the two relations: the declared
/// `unique_key`, or the `id` / `*_id` first-column convention.
pub fn primary_key(model: &SqlModel, columns: &[String]) -> Option<String> {
    if let Some(key) = &model.unique_key {
        return Some(key.clone());
    }
    columns
        .first()
        .filter(|c| *c == "id" || c.ends_with("_id"))
        .cloned()
}

/// Diffs every discovered model (optionally filtered by target names or a
/// schema). Never fails the batch: per-model errors land in the report.
pub async fn diff_models(
    warehouse: &Warehouse,
    transform_dir: &Path,
    targets: Option<&[String]>,
    target_schema: Option<&str>,
    full: bool,
) -> Result<Vec<DiffReport>, SiltError> {
    let mut models = ModelDiscovery::discover(transform_dir)?;
    if let Some(filter) = targets {
        if !filter.is_empty() {
            models.retain(|m| {
                filter.iter().any(|t| t == &m.full_name || t == &m.name)
            });
        }
    }
    if let Some(schema) = target_schema {
        models.retain(|m| m.schema == schema);
    }

    let mut reports = Vec::with_capacity(models.len());
    for model in &models {
        reports.push(diff_model(warehouse, model, full).await);
    }
    Ok(reports)
}

pub async fn diff_model(warehouse: &Warehouse, model: &SqlModel, full: bool) -> DiffReport {
    match diff_model_inner(warehouse, model, full).await {
        Ok(report) => report,
        Err(e) => DiffReport {
            error: Some(e.to_string()),
            ..DiffReport::empty(&model.full_name)
        },
    }
}

async fn diff_model_inner(
    warehouse: &Warehouse,
    model: &SqlModel,
    full: bool,
) -> Result<DiffReport, SiltError> {
    let mut report = DiffReport::empty(&model.full_name);
    let sample_limit = if full { FULL_SAMPLE_ROWS } else { SAMPLE_ROWS };

    let staging = format!("{}__{}__diff", model.schema, model.name);
    warehouse
        .execute(&format!(
            "CREATE OR REPLACE TEMPORARY VIEW {staging} AS\n{}",
            model.rendered_query()
        ))
        .await?;

    let result = async {
        report.total_after = warehouse
            .query_scalar(&format!("SELECT count(*) FROM {staging}"))
            .await?;

        if !warehouse.table_exists(&model.schema, &model.name).await? {
            report.is_new = true;
            report.added = report.total_after;
            let (_, rows) = warehouse.query_rows(
                &format!("SELECT * FROM {staging} LIMIT {sample_limit}"),
                sample_limit,
            )?;
            report.sample_added = rows;
            return Ok::<(), SiltError>(());
        }

        let target = &model.full_name;
        report.total_before = warehouse
            .query_scalar(&format!("SELECT count(*) FROM {target}"))
            .await?;

        let new_cols = warehouse.fetch_columns(&staging).await?;
        let old_cols = warehouse.fetch_columns(target).await?;

        for col in &new_cols {
            match old_cols.iter().find(|o| o.name == col.name) {
                None => report.schema_changes.push(SchemaChange {
                    column: col.name.clone(),
                    change_type: "added".into(),
                    detail: col.data_type.clone(),
                }),
                Some(old) if old.data_type != col.data_type => {
                    report.schema_changes.push(SchemaChange {
                        column: col.name.clone(),
                        change_type: "type_changed".into(),
                        detail: format!("{} -> {}", old.data_type, col.data_type),
                    })
                }
                Some(_) => {}
            }
        }
        for col in &old_cols {
            if !new_cols.iter().any(|n| n.name == col.name) {
                report.schema_changes.push(SchemaChange {
                    column: col.name.clone(),
                    change_type: "removed".into(),
                    detail: col.data_type.clone(),
                });
            }
        }

        // Row comparison runs over the shared columns, in target order.
        let common: Vec<String> = old_cols
            .iter()
            .filter(|o| new_cols.iter().any(|n| n.name == o.name))
            .map(|o| o.name.clone())
            .collect();
        if common.is_empty() {
            return Ok(());
        }
        let col_list = common.join(", ");

        match primary_key(model, &common) {
            Some(key) if common.contains(&key) => {
                report.added = warehouse
                    .query_scalar(&format!(
                        "SELECT count(*) FROM {staging} \
                         WHERE {key} NOT IN (SELECT {key} FROM {target})"
                    ))
                    .await?;
                report.removed = warehouse
                    .query_scalar(&format!(
                        "SELECT count(*) FROM {target} \
                         WHERE {key} NOT IN (SELECT {key} FROM {staging})"
                    ))
                    .await?;

                let value_cols: Vec<&String> = common.iter().filter(|c| **c != key).collect();
                if value_cols.is_empty() {
                    report.modified = 0;
                } else {
                    let differs = value_cols
                        .iter()
                        .map(|c| format!("n.{c} IS DISTINCT FROM o.{c}"))
                        .collect::<Vec<_>>()
                        .join(" OR ");
                    report.modified = warehouse
                        .query_scalar(&format!(
                            "SELECT count(*) FROM {staging} n \
                             JOIN {target} o ON n.{key} = o.{key} WHERE {differs}"
                        ))
                        .await?;
                }

                let (_, added_rows) = warehouse.query_rows(
                    &format!(
                        "SELECT {col_list} FROM {staging} \
                         WHERE {key} NOT IN (SELECT {key} FROM {target}) LIMIT {sample_limit}"
                    ),
                    sample_limit,
                )?;
                report.sample_added = added_rows;
                let (_, removed_rows) = warehouse.query_rows(
                    &format!(
                        "SELECT {col_list} FROM {target} \
                         WHERE {key} NOT IN (SELECT {key} FROM {staging}) LIMIT {sample_limit}"
                    ),
                    sample_limit,
                )?;
                report.sample_removed = removed_rows;
            }
            _ => {
                // No usable key: whole-row set difference, no "modified".
                report.added = warehouse
                    .query_scalar(&format!(
                        "SELECT count(*) FROM (SELECT {col_list} FROM {staging} \
                         EXCEPT SELECT {col_list} FROM {target})"
                    ))
                    .await?;
                report.removed = warehouse
                    .query_scalar(&format!(
                        "SELECT count(*) FROM (SELECT {col_list} FROM {target} \
                         EXCEPT SELECT {col_list} FROM {staging})"
                    ))
                    .await?;

                let (_, added_rows) = warehouse.query_rows(
                    &format!(
                        "SELECT {col_list} FROM {staging} \
                         EXCEPT SELECT {col_list} FROM {target} LIMIT {sample_limit}"
                    ),
                    sample_limit,
                )?;
                report.sample_added = added_rows;
            }
        }
        Ok(())
    }
    .await;

    let _ = warehouse
        .execute(&format!("DROP VIEW IF EXISTS {staging}"))
        .await;
    result?;
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::model::{fingerprint, Materialization};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn model(full_name: &str, query: &str, unique_key: Option<&str>) -> SqlModel {
        let (schema, name) = full_name.split_once('.').unwrap();
        SqlModel {
            path: PathBuf::from(format!("{name}.sql")),
            name: name.into(),
            schema: schema.into(),
            full_name: full_name.into(),
            sql: String::new(),
            query: query.into(),
            materialized: Materialization::Table,
            unique_key: unique_key.map(String::from),
            incremental_strategy: None,
            partition_by: None,
            incremental_filter: None,
            depends_on: vec![],
            assertions: vec![],
            description: String::new(),
            column_docs: BTreeMap::new(),
            content_hash: fingerprint(query),
            upstream_hash: String::new(),
            directive_errors: vec![],
        }
    }

    #[tokio::test]
    async fn test_new_model_diff() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("landing").unwrap();
        wh.execute("CREATE TABLE landing.src AS SELECT 1 AS id UNION ALL SELECT 2")
            .await
            .unwrap();

        let m = model("gold.out", "SELECT id FROM landing.src", None);
        let report = diff_model(&wh, &m, false).await;
        assert!(report.error.is_none());
        assert!(report.is_new);
        assert_eq!(report.added, 2);
        assert_eq!(report.total_after, 2);
    }

    #[tokio::test]
    async fn test_keyed_diff_counts_modifications() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("landing").unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute(
            "CREATE TABLE gold.out AS \
             SELECT 1 AS id, 'a' AS name UNION ALL SELECT 2, 'b' UNION ALL SELECT 3, 'c'",
        )
        .await
        .unwrap();
        wh.execute(
            "CREATE TABLE landing.src AS \
             SELECT 1 AS id, 'a_new' AS name UNION ALL SELECT 2, 'b' UNION ALL SELECT 4, 'd'",
        )
        .await
        .unwrap();

        let m = model("gold.out", "SELECT id, name FROM landing.src", Some("id"));
        let report = diff_model(&wh, &m, false).await;
        assert!(report.error.is_none());
        assert_eq!(report.added, 1); // id=4
        assert_eq!(report.removed, 1); // id=3
        assert_eq!(report.modified, 1); // id=1 changed name
        assert_eq!(report.total_before, 3);
        assert_eq!(report.total_after, 3);
        assert_eq!(report.sample_added.len(), 1);
    }

    #[tokio::test]
    async fn test_schema_change_detection() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("landing").unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute("CREATE TABLE gold.out AS SELECT 1 AS id, 'a' AS name")
            .await
            .unwrap();
        wh.execute("CREATE TABLE landing.src AS SELECT 1 AS id, 42 AS score")
            .await
            .unwrap();

        let m = model("gold.out", "SELECT id, score FROM landing.src", Some("id"));
        let report = diff_model(&wh, &m, false).await;
        let kinds: Vec<(&str, &str)> = report
            .schema_changes
            .iter()
            .map(|c| (c.column.as_str(), c.change_type.as_str()))
            .collect();
        assert!(kinds.contains(&("score", "added")));
        assert!(kinds.contains(&("name", "removed")));
    }

    #[tokio::test]
    async fn test_identical_output_has_no_changes() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("landing").unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute("CREATE TABLE landing.src AS SELECT 1 AS id, 'a' AS name")
            .await
            .unwrap();
        wh.execute("CREATE TABLE gold.out AS SELECT id, name FROM landing.src")
            .await
            .unwrap();

        let m = model("gold.out", "SELECT id, name FROM landing.src", Some("id"));
        let report = diff_model(&wh, &m, false).await;
        assert!(!report.has_changes(), "{report:?}");
    }

    #[tokio::test]
    async fn test_broken_query_lands_in_error() {
        let wh = Warehouse::in_memory().unwrap();
        let m = model("gold.broken", "SELECT * FROM landing.missing", None);
        let report = diff_model(&wh, &m, false).await;
        assert!(report.error.is_some());
    }
}
