// silt-core/src/application/lineage.rs
//
// AST-level lineage: physical table references and column attributions.
// `depends_on` directives stay authoritative for the DAG; everything here is
// diagnostic and must never take a run down (unparseable SQL yields empty
// results).

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectName, Query, Select, SelectItem,
    SelectItemQualifiedWildcardKind, SetExpr, Statement, TableFactor, WindowType,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::domain::graph::DagPlan;
use crate::domain::model::SqlModel;
use crate::error::SiltError;
use crate::infrastructure::warehouse::Warehouse;

/// One attribution: an output column comes from `source_table.source_column`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ColumnRef {
    pub source_table: String,
    pub source_column: String,
}

pub type ColumnLineage = BTreeMap<String, Vec<ColumnRef>>;

fn object_name_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| part.to_string().trim_matches('"').to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Physical tables read by a query, CTE names excluded.
pub fn extract_table_refs(sql: &str) -> BTreeSet<String> {
    let dialect = GenericDialect {};
    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(ast) => ast,
        Err(e) => {
            debug!("table ref extraction: unparseable SQL ({e})");
            return BTreeSet::new();
        }
    };

    let mut refs = BTreeSet::new();
    let mut cte_names = HashSet::new();
    for stmt in &statements {
        if let Statement::Query(query) = stmt {
            collect_table_refs(query, &mut cte_names, &mut refs);
        }
    }
    refs
}

fn collect_table_refs(
    query: &Query,
    cte_names: &mut HashSet<String>,
    refs: &mut BTreeSet<String>,
) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            cte_names.insert(cte.alias.name.value.to_lowercase());
        }
        for cte in &with.cte_tables {
            collect_table_refs(&cte.query, cte_names, refs);
        }
    }
    collect_table_refs_set_expr(&query.body, cte_names, refs);
}

fn collect_table_refs_set_expr(
    body: &SetExpr,
    cte_names: &mut HashSet<String>,
    refs: &mut BTreeSet<String>,
) {
    match body {
        SetExpr::Select(select) => {
            for table in &select.from {
                collect_table_factor(&table.relation, cte_names, refs);
                for join in &table.joins {
                    collect_table_factor(&join.relation, cte_names, refs);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            collect_table_refs_set_expr(left, cte_names, refs);
            collect_table_refs_set_expr(right, cte_names, refs);
        }
        SetExpr::Query(subquery) => collect_table_refs(subquery, cte_names, refs),
        _ => {}
    }
}

fn collect_table_factor(
    factor: &TableFactor,
    cte_names: &mut HashSet<String>,
    refs: &mut BTreeSet<String>,
) {
    match factor {
        TableFactor::Table { name, .. } => {
            let full = object_name_string(name);
            // Single-part names shadowed by a CTE are not physical reads.
            if !(name.0.len() == 1 && cte_names.contains(&full.to_lowercase())) {
                refs.insert(full);
            }
        }
        TableFactor::Derived { subquery, .. } => collect_table_refs(subquery, cte_names, refs),
        _ => {}
    }
}

// ── Column lineage ───────────────────────────────────────────────────

enum Source {
    Physical(String),
    /// Resolved lineage of a subquery or CTE.
    Derived(ColumnLineage),
}

struct Resolver<'a> {
    warehouse: Option<&'a Warehouse>,
    ctes: HashMap<String, Query>,
    /// Guards recursive CTE edges; a cycle yields empty attribution.
    in_progress: HashSet<String>,
}

impl<'a> Resolver<'a> {
    fn lineage_of_query(&mut self, query: &Query) -> ColumnLineage {
        let saved: Vec<(String, Option<Query>)> = match &query.with {
            None => vec![],
            Some(with) => with
                .cte_tables
                .iter()
                .map(|cte| {
                    let key = cte.alias.name.value.to_lowercase();
                    let previous = self.ctes.insert(key.clone(), (*cte.query).clone());
                    (key, previous)
                })
                .collect(),
        };

        let lineage = self.lineage_of_set_expr(&query.body);

        for (key, previous) in saved {
            match previous {
                Some(q) => {
                    self.ctes.insert(key, q);
                }
                None => {
                    self.ctes.remove(&key);
                }
            }
        }
        lineage
    }

    fn lineage_of_set_expr(&mut self, body: &SetExpr) -> ColumnLineage {
        match body {
            SetExpr::Select(select) => self.lineage_of_select(select),
            // UNION [ALL]: attributions come from the first branch.
            SetExpr::SetOperation { left, .. } => self.lineage_of_set_expr(left),
            SetExpr::Query(subquery) => self.lineage_of_query(subquery),
            _ => ColumnLineage::new(),
        }
    }

    fn lineage_of_select(&mut self, select: &Select) -> ColumnLineage {
        // Source registry: alias (or table name) -> physical table / resolved
        // subquery lineage, in FROM order.
        let mut sources: Vec<(Vec<String>, Source)> = Vec::new();

        let mut factors: Vec<&TableFactor> = Vec::new();
        for table in &select.from {
            factors.push(&table.relation);
            for join in &table.joins {
                factors.push(&join.relation);
            }
        }

        for factor in factors {
            match factor {
                TableFactor::Table { name, alias, .. } => {
                    let full = object_name_string(name);
                    let lowered = full.to_lowercase();
                    let source = if name.0.len() == 1 && self.ctes.contains_key(&lowered) {
                        if self.in_progress.contains(&lowered) {
                            Source::Derived(ColumnLineage::new())
                        } else {
                            self.in_progress.insert(lowered.clone());
                            let cte_query = match self.ctes.get(&lowered) {
                                Some(q) => q.clone(),
                                None => continue,
                            };
                            let resolved = self.lineage_of_query(&cte_query);
                            self.in_progress.remove(&lowered);
                            Source::Derived(resolved)
                        }
                    } else {
                        Source::Physical(full.clone())
                    };

                    let keys = match alias {
                        Some(a) => vec![a.name.value.to_lowercase()],
                        None => {
                            let mut keys = vec![lowered.clone()];
                            if let Some(last) = lowered.rsplit('.').next() {
                                if last != lowered {
                                    keys.push(last.to_string());
                                }
                            }
                            keys
                        }
                    };
                    sources.push((keys, source));
                }
                TableFactor::Derived {
                    subquery, alias, ..
                } => {
                    let resolved = self.lineage_of_query(subquery);
                    let keys = alias
                        .as_ref()
                        .map(|a| vec![a.name.value.to_lowercase()])
                        .unwrap_or_default();
                    sources.push((keys, Source::Derived(resolved)));
                }
                _ => {}
            }
        }

        let resolve = |qualifier: Option<&str>, column: &str| -> Vec<ColumnRef> {
            let matching: Vec<&Source> = match qualifier {
                Some(q) => {
                    let q = q.to_lowercase();
                    sources
                        .iter()
                        .filter(|(keys, _)| keys.contains(&q))
                        .map(|(_, s)| s)
                        .collect()
                }
                None if sources.len() == 1 => sources.iter().map(|(_, s)| s).collect(),
                None => vec![],
            };
            let mut refs = Vec::new();
            for source in matching {
                match source {
                    Source::Physical(table) => refs.push(ColumnRef {
                        source_table: table.clone(),
                        source_column: column.to_string(),
                    }),
                    Source::Derived(lineage) => {
                        if let Some(inner) = lineage.get(column) {
                            refs.extend(inner.iter().cloned());
                        }
                    }
                }
            }
            refs
        };

        let mut out = ColumnLineage::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    let name = output_name(expr);
                    let refs = resolve_refs(&collect_refs(expr), &resolve);
                    out.insert(name, refs);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let refs = resolve_refs(&collect_refs(expr), &resolve);
                    out.insert(alias.value.clone(), refs);
                }
                SelectItem::Wildcard(_) => {
                    for (_, source) in &sources {
                        self.expand_wildcard(source, &mut out);
                    }
                }
                SelectItem::QualifiedWildcard(kind, _) => {
                    if let SelectItemQualifiedWildcardKind::ObjectName(name) = kind {
                        let q = object_name_string(name).to_lowercase();
                        for (keys, source) in &sources {
                            if keys.contains(&q) {
                                self.expand_wildcard(source, &mut out);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// `SELECT *` resolution: the catalog when a warehouse is present,
    /// nothing otherwise (the gap is the caller's diagnostic).
    fn expand_wildcard(&self, source: &Source, out: &mut ColumnLineage) {
        match source {
            Source::Physical(table) => {
                let Some(warehouse) = self.warehouse else {
                    debug!("SELECT * over {table} without a warehouse; lineage gap");
                    return;
                };
                for column in physical_columns(warehouse, table) {
                    out.entry(column.clone()).or_default().push(ColumnRef {
                        source_table: table.clone(),
                        source_column: column,
                    });
                }
            }
            Source::Derived(lineage) => {
                for (column, refs) in lineage {
                    out.entry(column.clone())
                        .or_default()
                        .extend(refs.iter().cloned());
                }
            }
        }
    }
}

fn physical_columns(warehouse: &Warehouse, table: &str) -> Vec<String> {
    let fetched = warehouse.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info('{table}')"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>("name"))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    });
    fetched.unwrap_or_default()
}

fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        other => other.to_string(),
    }
}

fn resolve_refs(
    raw: &[(Option<String>, String)],
    resolve: &dyn Fn(Option<&str>, &str) -> Vec<ColumnRef>,
) -> Vec<ColumnRef> {
    let mut out: Vec<ColumnRef> = Vec::new();
    for (qualifier, column) in raw {
        for r in resolve(qualifier.as_deref(), column) {
            if !out.contains(&r) {
                out.push(r);
            }
        }
    }
    out
}

/// Column references inside an expression, as `(qualifier, column)` pairs.
fn collect_refs(expr: &Expr) -> Vec<(Option<String>, String)> {
    let mut refs = Vec::new();
    walk_expr(expr, &mut refs);
    refs
}

fn walk_expr(expr: &Expr, refs: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expr::Identifier(ident) => refs.push((None, ident.value.clone())),
        Expr::CompoundIdentifier(parts) => {
            if let Some((column, qualifier)) = parts.split_last() {
                let q = qualifier
                    .iter()
                    .map(|p| p.value.clone())
                    .collect::<Vec<_>>()
                    .join(".");
                refs.push((Some(q), column.value.clone()));
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, refs);
            walk_expr(right, refs);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            walk_expr(expr, refs);
        }
        Expr::IsNull(e) | Expr::IsNotNull(e) => walk_expr(e, refs),
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, refs);
            for item in list {
                walk_expr(item, refs);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, refs);
            walk_expr(low, refs);
            walk_expr(high, refs);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            walk_expr(expr, refs);
            walk_expr(pattern, refs);
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                walk_expr(op, refs);
            }
            for cw in conditions {
                walk_expr(&cw.condition, refs);
                walk_expr(&cw.result, refs);
            }
            if let Some(el) = else_result {
                walk_expr(el, refs);
            }
        }
        Expr::Function(func) => {
            walk_function_arguments(&func.args, refs);
            if let Some(WindowType::WindowSpec(spec)) = &func.over {
                for e in &spec.partition_by {
                    walk_expr(e, refs);
                }
                for ob in &spec.order_by {
                    walk_expr(&ob.expr, refs);
                }
            }
            if let Some(filter) = &func.filter {
                walk_expr(filter, refs);
            }
        }
        Expr::Tuple(exprs) => {
            for e in exprs {
                walk_expr(e, refs);
            }
        }
        // Scalar subqueries are scoped to their own FROM; their outer
        // projection keeps the key with whatever direct refs it also has.
        _ => {}
    }
}

fn walk_function_arguments(args: &FunctionArguments, refs: &mut Vec<(Option<String>, String)>) {
    if let FunctionArguments::List(list) = args {
        for arg in &list.args {
            match arg {
                FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => {
                    if let FunctionArgExpr::Expr(e) = arg {
                        walk_expr(e, refs);
                    }
                }
                FunctionArg::ExprNamed { name, arg, .. } => {
                    walk_expr(name, refs);
                    if let FunctionArgExpr::Expr(e) = arg {
                        walk_expr(e, refs);
                    }
                }
            }
        }
    }
}

/// Column lineage of one query. Pass a warehouse to resolve `SELECT *`
/// through the catalog.
pub fn extract_column_lineage(sql: &str, warehouse: Option<&Warehouse>) -> ColumnLineage {
    let dialect = GenericDialect {};
    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(ast) => ast,
        Err(e) => {
            debug!("column lineage: unparseable SQL ({e})");
            return ColumnLineage::new();
        }
    };

    let mut resolver = Resolver {
        warehouse,
        ctes: HashMap::new(),
        in_progress: HashSet::new(),
    };
    for stmt in &statements {
        if let Statement::Query(query) = stmt {
            return resolver.lineage_of_query(query);
        }
    }
    ColumnLineage::new()
}

// ── Impact analysis ──────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct AffectedColumn {
    pub model: String,
    pub column: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ImpactReport {
    pub model: String,
    pub column: Option<String>,
    pub downstream_models: Vec<String>,
    /// node -> its direct downstream models, over the affected closure.
    pub impact_chain: BTreeMap<String, Vec<String>>,
    pub affected_columns: Vec<AffectedColumn>,
}

/// Transitive downstream closure of `target`, optionally narrowed to the
/// descendants whose column lineage traces back to `column`.
pub fn impact_analysis(
    models: &[SqlModel],
    target: &str,
    column: Option<&str>,
    warehouse: Option<&Warehouse>,
) -> Result<ImpactReport, SiltError> {
    let plan = DagPlan::plan(models)?;
    let downstream = plan.descendants(target);

    let mut impact_chain = BTreeMap::new();
    for node in std::iter::once(target.to_string()).chain(downstream.iter().cloned()) {
        let direct = plan.direct_downstream(&node).to_vec();
        if !direct.is_empty() {
            impact_chain.insert(node, direct);
        }
    }

    let mut affected_columns = Vec::new();
    if let Some(column) = column {
        // Walk in topological order, propagating (model, column) taint.
        let mut tainted: HashSet<(String, String)> = HashSet::new();
        tainted.insert((target.to_string(), column.to_string()));
        let downstream_set: HashSet<&str> = downstream.iter().map(String::as_str).collect();
        let by_name: HashMap<&str, &SqlModel> =
            models.iter().map(|m| (m.full_name.as_str(), m)).collect();

        for name in &plan.order {
            if !downstream_set.contains(name.as_str()) {
                continue;
            }
            let Some(model) = by_name.get(name.as_str()) else {
                continue;
            };
            let lineage = extract_column_lineage(&model.query, warehouse);
            for (out_col, refs) in &lineage {
                let hit = refs.iter().any(|r| {
                    tainted.contains(&(r.source_table.clone(), r.source_column.clone()))
                });
                if hit {
                    tainted.insert((name.clone(), out_col.clone()));
                    affected_columns.push(AffectedColumn {
                        model: name.clone(),
                        column: out_col.clone(),
                    });
                }
            }
        }
    }

    Ok(ImpactReport {
        model: target.to_string(),
        column: column.map(String::from),
        downstream_models: downstream,
        impact_chain,
        affected_columns,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::model::Materialization;
    use crate::ports::executor::Executor;
    use std::collections::BTreeMap as Docs;
    use std::path::PathBuf;

    fn model(full_name: &str, query: &str, deps: Vec<&str>) -> SqlModel {
        let (schema, name) = full_name.split_once('.').unwrap();
        SqlModel {
            path: PathBuf::from(format!("{name}.sql")),
            name: name.into(),
            schema: schema.into(),
            full_name: full_name.into(),
            sql: String::new(),
            query: query.into(),
            materialized: Materialization::Table,
            unique_key: None,
            incremental_strategy: None,
            partition_by: None,
            incremental_filter: None,
            depends_on: deps.into_iter().map(String::from).collect(),
            assertions: vec![],
            description: String::new(),
            column_docs: Docs::new(),
            content_hash: String::new(),
            upstream_hash: String::new(),
            directive_errors: vec![],
        }
    }

    #[test]
    fn test_table_refs_ignore_cte_names() {
        let refs = extract_table_refs(
            "WITH filtered AS (SELECT id FROM bronze.customers WHERE active) \
             SELECT f.id FROM filtered f JOIN bronze.orders o ON o.customer_id = f.id",
        );
        assert!(refs.contains("bronze.customers"));
        assert!(refs.contains("bronze.orders"));
        assert!(!refs.contains("filtered"));
    }

    #[test]
    fn test_table_refs_unparseable() {
        assert!(extract_table_refs("THIS IS NOT SQL AT ALL").is_empty());
    }

    #[test]
    fn test_lineage_with_alias() {
        let lineage = extract_column_lineage(
            "SELECT e.event_id, e.magnitude AS mag FROM silver.earthquake_events AS e",
            None,
        );
        assert_eq!(
            lineage["mag"],
            vec![ColumnRef {
                source_table: "silver.earthquake_events".into(),
                source_column: "magnitude".into()
            }]
        );
        assert!(lineage.contains_key("event_id"));
    }

    #[test]
    fn test_lineage_joined_tables() {
        let lineage = extract_column_lineage(
            "SELECT c.customer_id, c.name, COUNT(o.order_id) AS order_count \
             FROM bronze.customers c LEFT JOIN bronze.orders o \
             ON c.customer_id = o.customer_id GROUP BY 1, 2",
            None,
        );
        assert!(lineage["customer_id"]
            .iter()
            .any(|r| r.source_table == "bronze.customers"));
        assert!(lineage["order_count"]
            .iter()
            .any(|r| r.source_table == "bronze.orders" && r.source_column == "order_id"));
    }

    #[test]
    fn test_lineage_computed_column() {
        let lineage = extract_column_lineage(
            "SELECT d.id, d.amount * 1.1 AS amount_with_tax FROM bronze.data d",
            None,
        );
        assert!(lineage["amount_with_tax"]
            .iter()
            .any(|r| r.source_column == "amount"));
    }

    #[test]
    fn test_lineage_case_and_window() {
        let lineage = extract_column_lineage(
            "SELECT e.id, \
             CASE WHEN e.magnitude >= 5.0 THEN 'strong' ELSE 'weak' END AS strength, \
             ROW_NUMBER() OVER (PARTITION BY e.region ORDER BY e.magnitude DESC) AS rn \
             FROM bronze.events e",
            None,
        );
        assert!(lineage["strength"]
            .iter()
            .any(|r| r.source_column == "magnitude"));
        let rn_cols: Vec<&str> = lineage["rn"]
            .iter()
            .map(|r| r.source_column.as_str())
            .collect();
        assert!(rn_cols.contains(&"region"));
        assert!(rn_cols.contains(&"magnitude"));
    }

    #[test]
    fn test_lineage_unwinds_ctes() {
        let lineage = extract_column_lineage(
            "WITH filtered AS (SELECT id, name FROM bronze.customers WHERE active = true) \
             SELECT f.id, f.name FROM filtered f",
            None,
        );
        assert!(lineage["id"]
            .iter()
            .any(|r| r.source_table == "bronze.customers"));
        assert!(lineage["name"]
            .iter()
            .any(|r| r.source_table == "bronze.customers"));
    }

    #[test]
    fn test_lineage_union_takes_first_branch() {
        let lineage = extract_column_lineage(
            "SELECT a.id, a.name FROM bronze.customers_a a \
             UNION ALL SELECT b.id, b.name FROM bronze.customers_b b",
            None,
        );
        assert_eq!(lineage["id"].len(), 1);
        assert_eq!(lineage["id"][0].source_table, "bronze.customers_a");
    }

    #[test]
    fn test_lineage_recursive_cte_terminates() {
        let lineage = extract_column_lineage(
            "WITH walk AS (SELECT id FROM walk) SELECT w.id FROM walk w",
            None,
        );
        // Terminates with an empty attribution instead of recursing forever.
        assert_eq!(lineage.get("id").map(Vec::len), Some(0));
    }

    #[test]
    fn test_lineage_unparseable_is_empty() {
        assert!(extract_column_lineage("NOT SQL %%%", None).is_empty());
    }

    #[tokio::test]
    async fn test_lineage_star_with_warehouse() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("bronze").unwrap();
        wh.execute("CREATE TABLE bronze.src AS SELECT 1 AS id, 'x' AS name, 3.14 AS val")
            .await
            .unwrap();

        let lineage = extract_column_lineage("SELECT * FROM bronze.src", Some(&wh));
        assert!(lineage.contains_key("id"));
        assert!(lineage.contains_key("name"));
        assert!(lineage.contains_key("val"));
        assert_eq!(lineage["id"][0].source_table, "bronze.src");

        // Without a warehouse the gap is reported as an empty map.
        let blind = extract_column_lineage("SELECT * FROM bronze.src", None);
        assert!(blind.is_empty());
    }

    #[test]
    fn test_impact_diamond() {
        let models = vec![
            model("bronze.a", "SELECT 1 AS id", vec![]),
            model("silver.b", "SELECT a.id FROM bronze.a a", vec!["bronze.a"]),
            model("silver.c", "SELECT a.id FROM bronze.a a", vec!["bronze.a"]),
            model(
                "gold.d",
                "SELECT b.id FROM silver.b b",
                vec!["silver.b", "silver.c"],
            ),
        ];
        let report = impact_analysis(&models, "bronze.a", None, None).unwrap();
        assert_eq!(
            report.downstream_models,
            vec!["gold.d", "silver.b", "silver.c"]
        );
        assert!(report.impact_chain["bronze.a"].contains(&"silver.b".to_string()));
    }

    #[test]
    fn test_impact_with_column_taint() {
        let models = vec![
            model("bronze.src", "SELECT 1 AS id, 'x' AS name", vec![]),
            model(
                "silver.users",
                "SELECT s.id, s.name FROM bronze.src s",
                vec!["bronze.src"],
            ),
            model(
                "gold.ids",
                "SELECT u.id FROM silver.users u",
                vec!["silver.users"],
            ),
        ];
        let report = impact_analysis(&models, "bronze.src", Some("name"), None).unwrap();
        assert!(report
            .affected_columns
            .iter()
            .any(|a| a.model == "silver.users" && a.column == "name"));
        // gold.ids only reads id; name taint stops there.
        assert!(!report.affected_columns.iter().any(|a| a.model == "gold.ids"));
    }
}
