// silt-core/src/application/profiler.rs
//
// Post-build column profiles and freshness derived from `model_state`.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::SiltError;
use crate::infrastructure::warehouse::Warehouse;
use crate::ports::executor::Executor;

/// Distinct counts are computed over at most this many rows so profiling a
/// very large table stays bounded.
const DISTINCT_SAMPLE_ROWS: i64 = 1_000_000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProfileReport {
    pub full_name: String,
    pub row_count: i64,
    pub column_count: i64,
    pub null_percentages: BTreeMap<String, f64>,
    pub distinct_counts: BTreeMap<String, i64>,
}

impl ProfileReport {
    pub fn null_percentages_json(&self) -> serde_json::Value {
        serde_json::json!(self.null_percentages)
    }

    pub fn distinct_counts_json(&self) -> serde_json::Value {
        serde_json::json!(self.distinct_counts)
    }
}

/// Profiles one materialized relation: row/column counts, per-column null
/// rate and (sampled) distinct count.
pub async fn profile_model(
    executor: &dyn Executor,
    full_name: &str,
) -> Result<ProfileReport, SiltError> {
    let columns = executor.fetch_columns(full_name).await?;
    let row_count = executor
        .query_scalar(&format!("SELECT count(*) FROM {full_name}"))
        .await?;

    let mut null_percentages = BTreeMap::new();
    let mut distinct_counts = BTreeMap::new();

    for column in &columns {
        let name = &column.name;
        let null_count = executor
            .query_scalar(&format!(
                "SELECT count(*) FROM {full_name} WHERE {name} IS NULL"
            ))
            .await?;
        let pct = 100.0 * null_count as f64 / row_count.max(1) as f64;
        null_percentages.insert(name.clone(), pct);

        let distinct = executor
            .query_scalar(&format!(
                "SELECT count(DISTINCT {name}) FROM \
                 (SELECT {name} FROM {full_name} LIMIT {DISTINCT_SAMPLE_ROWS})"
            ))
            .await?;
        distinct_counts.insert(name.clone(), distinct);
    }

    debug!("profiled {full_name}: {row_count} rows, {} columns", columns.len());
    Ok(ProfileReport {
        full_name: full_name.to_string(),
        row_count,
        column_count: columns.len() as i64,
        null_percentages,
        distinct_counts,
    })
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FreshnessStatus {
    pub model: String,
    pub hours_since_run: f64,
    pub is_stale: bool,
}

/// Freshness of every model with a `model_state` row, against a maximum age.
pub fn check_freshness(
    warehouse: &Warehouse,
    max_age_hours: f64,
) -> Result<Vec<FreshnessStatus>, SiltError> {
    let rows = warehouse.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT full_name, \
                    date_diff('second', last_run_at, current_timestamp) \
             FROM _silt_internal.model_state ORDER BY full_name",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in mapped {
            out.push(row?);
        }
        Ok(out)
    })?;

    Ok(rows
        .into_iter()
        .map(|(model, age_seconds)| {
            let hours_since_run = age_seconds as f64 / 3600.0;
            FreshnessStatus {
                model,
                is_stale: hours_since_run > max_age_hours,
                hours_since_run,
            }
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::infrastructure::meta::MetaStore;

    #[tokio::test]
    async fn test_profile_counts_nulls_and_distincts() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute(
            "CREATE TABLE gold.stats AS \
             SELECT 1 AS id, 'alice' AS name, 25 AS age \
             UNION ALL SELECT 2, NULL, 30",
        )
        .await
        .unwrap();

        let profile = profile_model(&wh, "gold.stats").await.unwrap();
        assert_eq!(profile.row_count, 2);
        assert_eq!(profile.column_count, 3);
        assert!((profile.null_percentages["name"] - 50.0).abs() < f64::EPSILON);
        assert!((profile.null_percentages["id"] - 0.0).abs() < f64::EPSILON);
        assert_eq!(profile.distinct_counts["id"], 2);
        assert_eq!(profile.distinct_counts["age"], 2);
    }

    #[tokio::test]
    async fn test_profile_empty_table() {
        let wh = Warehouse::in_memory().unwrap();
        wh.ensure_schema("gold").unwrap();
        wh.execute("CREATE TABLE gold.empty (id INTEGER, name VARCHAR)")
            .await
            .unwrap();

        let profile = profile_model(&wh, "gold.empty").await.unwrap();
        assert_eq!(profile.row_count, 0);
        assert_eq!(profile.column_count, 2);
        assert!((profile.null_percentages["id"] - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_freshness_classification() {
        let wh = Warehouse::in_memory().unwrap();
        let meta = MetaStore::new(wh.clone());
        meta.ensure_meta_tables().unwrap();

        wh.execute(
            "INSERT INTO _silt_internal.model_state \
             (full_name, content_hash, upstream_hash, materialized_as, last_run_at, row_count) \
             VALUES ('gold.fresh', 'a', '', 'table', current_timestamp - INTERVAL 2 HOUR, 10), \
                    ('gold.old', 'b', '', 'table', current_timestamp - INTERVAL 48 HOUR, 10)",
        )
        .await
        .unwrap();

        let statuses = check_freshness(&wh, 24.0).unwrap();
        assert_eq!(statuses.len(), 2);

        let fresh = statuses.iter().find(|s| s.model == "gold.fresh").unwrap();
        assert!(!fresh.is_stale);
        assert!(fresh.hours_since_run >= 1.9 && fresh.hours_since_run < 3.0);

        let old = statuses.iter().find(|s| s.model == "gold.old").unwrap();
        assert!(old.is_stale);
    }

    #[tokio::test]
    async fn test_freshness_empty_state() {
        let wh = Warehouse::in_memory().unwrap();
        MetaStore::new(wh.clone()).ensure_meta_tables().unwrap();
        assert!(check_freshness(&wh, 24.0).unwrap().is_empty());
    }
}
