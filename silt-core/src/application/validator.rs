// silt-core/src/application/validator.rs
//
// Compile-time validation: every model is checked without materializing
// anything. Intra-project references need no rewriting here, because a
// model's `full_name` is already its future physical identifier. Known-model
// refs are trusted; everything else must exist in the catalog.

use sqlparser::ast::{Expr, Query, Select, SetExpr, Statement, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::application::lineage::extract_table_refs;
use crate::domain::model::SqlModel;
use crate::infrastructure::warehouse::Warehouse;
use crate::ports::executor::Executor;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    pub model: String,
    pub path: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    fn new(model: &SqlModel, line: Option<usize>, message: String) -> Self {
        Self {
            model: model.full_name.clone(),
            path: model.path.clone(),
            line,
            message,
        }
    }
}

/// Validates every model. With a warehouse the checks extend to missing
/// relations, unknown qualified columns, and an EXPLAIN-prepare of the
/// query; without one only directive and parse checks run.
pub async fn validate_models(
    warehouse: Option<&Warehouse>,
    models: &[SqlModel],
) -> Vec<ValidationIssue> {
    let known: HashSet<&str> = models.iter().map(|m| m.full_name.as_str()).collect();
    let mut issues = Vec::new();

    for model in models {
        for issue in &model.directive_errors {
            issues.push(ValidationIssue::new(
                model,
                Some(issue.line),
                issue.message.clone(),
            ));
        }

        let dialect = GenericDialect {};
        let parsed = match Parser::parse_sql(&dialect, &model.rendered_query()) {
            Ok(ast) => ast,
            Err(e) => {
                issues.push(ValidationIssue::new(
                    model,
                    None,
                    format!("SQL parse error: {e}"),
                ));
                continue;
            }
        };

        let Some(warehouse) = warehouse else {
            continue;
        };

        // Declared deps that name neither a known model nor an existing
        // relation can never build.
        let mut missing_relation = false;
        let mut refs = extract_table_refs(&model.rendered_query());
        for dep in &model.depends_on {
            refs.insert(dep.clone());
        }
        for reference in &refs {
            if known.contains(reference.as_str()) {
                continue;
            }
            let Some((schema, name)) = reference.split_once('.') else {
                continue;
            };
            match warehouse.table_exists(schema, name).await {
                Ok(true) => {}
                Ok(false) => {
                    missing_relation = true;
                    issues.push(ValidationIssue::new(
                        model,
                        None,
                        format!("Table '{reference}' does not exist"),
                    ));
                }
                Err(e) => {
                    issues.push(ValidationIssue::new(model, None, e.to_string()));
                }
            }
        }

        // Qualified column refs against tables that already exist.
        for stmt in &parsed {
            if let Statement::Query(query) = stmt {
                check_qualified_columns(warehouse, model, query, &known, &mut issues).await;
            }
        }

        // A full prepare only makes sense once every relation resolves; an
        // unbuilt dependency chain must not read as an error.
        let all_physical = !missing_relation
            && refs
                .iter()
                .all(|r| !known.contains(r.as_str()) || relation_exists(warehouse, r));
        if all_physical {
            let explain = format!("EXPLAIN {}", model.rendered_query());
            let prepared = warehouse.with_conn(|conn| conn.prepare(&explain).map(|_| ()));
            if let Err(e) = prepared {
                issues.push(ValidationIssue::new(model, None, format!("{e}")));
            }
        }
    }

    issues
}

fn relation_exists(warehouse: &Warehouse, full_name: &str) -> bool {
    let Some((schema, name)) = full_name.split_once('.') else {
        return false;
    };
    let escaped_schema = schema.replace('\'', "''");
    let escaped_name = name.replace('\'', "''");
    warehouse
        .with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT count(*) FROM information_schema.tables \
                     WHERE table_schema = '{escaped_schema}' AND table_name = '{escaped_name}'"
                ),
                [],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|count| count > 0)
        .unwrap_or(false)
}

async fn check_qualified_columns(
    warehouse: &Warehouse,
    model: &SqlModel,
    query: &Query,
    known: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut selects = Vec::new();
    collect_selects(&query.body, &mut selects);

    for select in selects {
        // alias (or table name) -> physical relation
        let mut aliases: HashMap<String, String> = HashMap::new();
        for table in &select.from {
            let mut factors = vec![&table.relation];
            factors.extend(table.joins.iter().map(|j| &j.relation));
            for factor in factors {
                if let TableFactor::Table { name, alias, .. } = factor {
                    let full = name
                        .0
                        .iter()
                        .map(|p| p.to_string().trim_matches('"').to_string())
                        .collect::<Vec<_>>()
                        .join(".");
                    let key = match alias {
                        Some(a) => a.name.value.to_lowercase(),
                        None => full
                            .rsplit('.')
                            .next()
                            .unwrap_or(full.as_str())
                            .to_lowercase(),
                    };
                    aliases.insert(key, full);
                }
            }
        }

        let mut column_refs: Vec<(String, String)> = Vec::new();
        for item in &select.projection {
            match item {
                sqlparser::ast::SelectItem::UnnamedExpr(expr)
                | sqlparser::ast::SelectItem::ExprWithAlias { expr, .. } => {
                    collect_compound_refs(expr, &mut column_refs);
                }
                _ => {}
            }
        }
        if let Some(selection) = &select.selection {
            collect_compound_refs(selection, &mut column_refs);
        }

        for (qualifier, column) in column_refs {
            let Some(table) = aliases.get(&qualifier) else {
                continue;
            };
            // Known models are trusted: their own validation carries them.
            if known.contains(table.as_str()) {
                continue;
            }
            let Some((schema, name)) = table.split_once('.') else {
                continue;
            };
            match warehouse.table_exists(schema, name).await {
                Ok(true) => {}
                _ => continue,
            }
            let columns = match warehouse.fetch_columns(table).await {
                Ok(cols) => cols,
                Err(_) => continue,
            };
            let found = columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column));
            if !found {
                issues.push(ValidationIssue::new(
                    model,
                    None,
                    format!("Column '{column}' not found in table '{table}'"),
                ));
            }
        }
    }
}

fn collect_selects<'a>(body: &'a SetExpr, out: &mut Vec<&'a Select>) {
    match body {
        SetExpr::Select(select) => out.push(select),
        SetExpr::SetOperation { left, right, .. } => {
            collect_selects(left, out);
            collect_selects(right, out);
        }
        SetExpr::Query(query) => collect_selects(&query.body, out),
        _ => {}
    }
}

fn collect_compound_refs(expr: &Expr, out: &mut Vec<(String, String)>) {
    match expr {
        Expr::CompoundIdentifier(parts) => {
            if parts.len() == 2 {
                out.push((parts[0].value.to_lowercase(), parts[1].value.clone()));
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_compound_refs(left, out);
            collect_compound_refs(right, out);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            collect_compound_refs(expr, out);
        }
        Expr::IsNull(e) | Expr::IsNotNull(e) => collect_compound_refs(e, out),
        Expr::Function(func) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(e),
                    ) = arg
                    {
                        collect_compound_refs(e, out);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::infrastructure::discovery::ModelDiscovery;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    async fn warehouse_with_landing() -> Warehouse {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("landing").unwrap();
        wh.execute("CREATE TABLE landing.users AS SELECT 1 AS id, 'alice' AS name")
            .await
            .unwrap();
        wh
    }

    #[tokio::test]
    async fn test_valid_models_pass() {
        let wh = warehouse_with_landing().await;
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/users.sql",
            "-- config: materialized=table\n-- depends_on: landing.users\n\
             SELECT id, name FROM landing.users",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(Some(&wh), &models).await;
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[tokio::test]
    async fn test_parse_error_detected_without_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/bad.sql",
            "SELECTT id FRUM landing.data WHEREE",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(None, &models).await;
        assert!(issues
            .iter()
            .any(|i| i.message.to_lowercase().contains("parse error")));
    }

    #[tokio::test]
    async fn test_missing_table_detected() {
        let wh = warehouse_with_landing().await;
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/missing.sql",
            "-- config: materialized=table\n-- depends_on: landing.nonexistent\n\
             SELECT id FROM landing.nonexistent",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(Some(&wh), &models).await;
        assert!(issues
            .iter()
            .any(|i| i.message.contains("'landing.nonexistent' does not exist")));
    }

    #[tokio::test]
    async fn test_unknown_column_detected() {
        let wh = warehouse_with_landing().await;
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/users.sql",
            "-- config: materialized=table\n-- depends_on: landing.users\n\
             SELECT u.id, u.nonexistent_column FROM landing.users u",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(Some(&wh), &models).await;
        assert!(issues
            .iter()
            .any(|i| i.message.contains("'nonexistent_column' not found")));
    }

    #[tokio::test]
    async fn test_reference_to_unbuilt_model_is_trusted() {
        let wh = warehouse_with_landing().await;
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(&transform, "bronze/a.sql", "SELECT 1 AS id");
        write(
            &transform,
            "silver/b.sql",
            "-- config: materialized=table\n-- depends_on: bronze.a\nSELECT id FROM bronze.a",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(Some(&wh), &models).await;
        assert!(
            !issues.iter().any(|i| i.message.contains("bronze.a")),
            "known model refs must not error: {issues:?}"
        );
    }

    #[tokio::test]
    async fn test_directive_errors_surface_here() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/odd.sql",
            "-- config: materialized=view, sharding=16\nSELECT 1",
        );
        let models = ModelDiscovery::discover(&transform).unwrap();
        let issues = validate_models(None, &models).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, Some(1));
        assert!(issues[0].message.contains("sharding"));
    }
}
