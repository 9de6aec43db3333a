// silt-core/src/application/seed.rs
//
// CSV seeds: `seeds/<name>.csv` loads into `seeds.<name>`, with file-hash
// change detection through `model_state` so unchanged files are skipped.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::error::SiltError;
use crate::infrastructure::meta::{MetaStore, ModelState, RunRecord};
use crate::infrastructure::warehouse::Warehouse;
use crate::ports::executor::Executor;

pub const SEED_SCHEMA: &str = "seeds";

#[derive(Debug, Clone)]
pub struct Seed {
    pub path: PathBuf,
    pub name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Loaded,
    Skipped,
    Error(String),
}

pub fn discover_seeds(seeds_dir: &Path) -> Vec<Seed> {
    let mut seeds = Vec::new();
    if !seeds_dir.exists() {
        return seeds;
    }
    let mut files: Vec<PathBuf> = fs::read_dir(seeds_dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();

    for path in files {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        seeds.push(Seed {
            full_name: format!("{SEED_SCHEMA}.{name}"),
            name,
            path,
        });
    }
    seeds
}

fn file_hash(path: &Path) -> Result<String, SiltError> {
    let bytes = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes))[..16].to_string())
}

/// Loads all (or selected) seeds. Unchanged files skip unless forced.
pub async fn run_seeds(
    warehouse: &Warehouse,
    seeds_dir: &Path,
    targets: Option<&[String]>,
    force: bool,
) -> Result<BTreeMap<String, SeedStatus>, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let mut seeds = discover_seeds(seeds_dir);
    if let Some(filter) = targets {
        if !filter.is_empty() && filter != ["all"] {
            seeds.retain(|s| filter.iter().any(|t| t == &s.name || t == &s.full_name));
        }
    }

    let mut results = BTreeMap::new();
    if seeds.is_empty() {
        info!("no seeds found in {:?}", seeds_dir);
        return Ok(results);
    }

    warehouse.ensure_schema(SEED_SCHEMA)?;

    for seed in &seeds {
        let status = load_seed(warehouse, &meta, seed, force).await;
        if let SeedStatus::Error(e) = &status {
            warn!("seed {} failed: {e}", seed.name);
        }
        results.insert(seed.full_name.clone(), status);
    }
    Ok(results)
}

async fn load_seed(
    warehouse: &Warehouse,
    meta: &MetaStore,
    seed: &Seed,
    force: bool,
) -> SeedStatus {
    let content_hash = match file_hash(&seed.path) {
        Ok(h) => h,
        Err(e) => return SeedStatus::Error(e.to_string()),
    };

    if !force {
        match meta.get_model_state(&seed.full_name) {
            Ok(Some(state)) if state.content_hash == content_hash => {
                return SeedStatus::Skipped;
            }
            Ok(_) => {}
            Err(e) => return SeedStatus::Error(e.to_string()),
        }
    }

    let start = Instant::now();
    let escaped = seed.path.to_string_lossy().replace('\'', "''");
    let ddl = format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto('{escaped}')",
        seed.full_name
    );

    let loaded = async {
        warehouse.execute(&ddl).await?;
        warehouse
            .query_scalar(&format!("SELECT count(*) FROM {}", seed.full_name))
            .await
    }
    .await;

    let duration_ms = start.elapsed().as_millis() as i64;
    match loaded {
        Ok(row_count) => {
            let state = ModelState {
                full_name: seed.full_name.clone(),
                content_hash,
                upstream_hash: String::new(),
                materialized_as: "seed".into(),
                run_duration_ms: duration_ms,
                row_count,
            };
            if let Err(e) = meta.upsert_model_state(&state) {
                return SeedStatus::Error(e.to_string());
            }
            let _ = meta.log_run(&RunRecord {
                run_type: "seed".into(),
                target: seed.full_name.clone(),
                status: "success".into(),
                duration_ms,
                rows_affected: row_count,
                ..Default::default()
            });
            info!("loaded seed {} ({row_count} rows)", seed.full_name);
            SeedStatus::Loaded
        }
        Err(e) => {
            let _ = meta.log_run(&RunRecord {
                run_type: "seed".into(),
                target: seed.full_name.clone(),
                status: "error".into(),
                duration_ms,
                error: Some(e.to_string()),
                ..Default::default()
            });
            SeedStatus::Error(e.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Warehouse, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let wh = Warehouse::open(tmp.path().join("t.duckdb").to_str().unwrap()).unwrap();
        let seeds = tmp.path().join("seeds");
        fs::create_dir_all(&seeds).unwrap();
        (tmp, wh, seeds)
    }

    #[tokio::test]
    async fn test_seed_loads_then_skips() {
        let (_tmp, wh, seeds) = setup();
        fs::write(seeds.join("countries.csv"), "code,name\nFR,France\nDE,Germany\n").unwrap();

        let results = run_seeds(&wh, &seeds, None, false).await.unwrap();
        assert_eq!(results["seeds.countries"], SeedStatus::Loaded);
        let count = wh
            .query_scalar("SELECT count(*) FROM seeds.countries")
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Unchanged file skips on the next run.
        let results = run_seeds(&wh, &seeds, None, false).await.unwrap();
        assert_eq!(results["seeds.countries"], SeedStatus::Skipped);

        // Edits reload.
        fs::write(
            seeds.join("countries.csv"),
            "code,name\nFR,France\nDE,Germany\nIT,Italy\n",
        )
        .unwrap();
        let results = run_seeds(&wh, &seeds, None, false).await.unwrap();
        assert_eq!(results["seeds.countries"], SeedStatus::Loaded);
        let count = wh
            .query_scalar("SELECT count(*) FROM seeds.countries")
            .await
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_force_reloads_unchanged_seed() {
        let (_tmp, wh, seeds) = setup();
        fs::write(seeds.join("codes.csv"), "id\n1\n").unwrap();
        run_seeds(&wh, &seeds, None, false).await.unwrap();
        let results = run_seeds(&wh, &seeds, None, true).await.unwrap();
        assert_eq!(results["seeds.codes"], SeedStatus::Loaded);
    }

    #[tokio::test]
    async fn test_target_filter() {
        let (_tmp, wh, seeds) = setup();
        fs::write(seeds.join("a.csv"), "id\n1\n").unwrap();
        fs::write(seeds.join("b.csv"), "id\n1\n").unwrap();

        let targets = vec!["a".to_string()];
        let results = run_seeds(&wh, &seeds, Some(&targets), false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("seeds.a"));
    }

    #[tokio::test]
    async fn test_missing_dir_is_noop() {
        let (_tmp, wh, _) = setup();
        let results = run_seeds(&wh, Path::new("/nonexistent/seeds"), None, false)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
