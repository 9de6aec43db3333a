// silt-core/src/application/snapshot.rs
//
// Named checkpoints of project + data state: a manifest of project file
// hashes and per-table signatures, good enough to answer "what drifted
// since the baseline?" without git.

use chrono::Local;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::SiltError;
use crate::infrastructure::meta::MetaStore;
use crate::infrastructure::warehouse::Warehouse;

const SNAPSHOT_DIRS: &[&str] = &["transform", "ingest", "export", "seeds", "contracts"];
const SNAPSHOT_FILES: &[&str] = &["project.yml"];
const SNAPSHOT_EXTENSIONS: &[&str] = &["sql", "yml", "yaml", "csv", "sh", "py"];

fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))[..16].to_string()
}

/// `relative path -> content hash` over everything snapshot-worthy.
pub fn build_file_manifest(project_dir: &Path) -> BTreeMap<String, String> {
    let mut manifest = BTreeMap::new();

    for dir in SNAPSHOT_DIRS {
        let dir_path = project_dir.join(dir);
        if !dir_path.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir_path).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let keep = path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SNAPSHOT_EXTENSIONS.contains(&e));
            if !keep {
                continue;
            }
            if let (Ok(rel), Ok(bytes)) = (path.strip_prefix(project_dir), fs::read(path)) {
                manifest.insert(rel.to_string_lossy().to_string(), hash_bytes(&bytes));
            }
        }
    }

    for file in SNAPSHOT_FILES {
        let path = project_dir.join(file);
        if let Ok(bytes) = fs::read(&path) {
            manifest.insert((*file).to_string(), hash_bytes(&bytes));
        }
    }

    manifest
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableSignature {
    pub row_count: i64,
    pub col_hash: String,
}

/// `schema.table -> signature` for every user-visible relation.
pub fn build_table_signatures(
    warehouse: &Warehouse,
) -> Result<BTreeMap<String, TableSignature>, SiltError> {
    let tables = warehouse.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_schema NOT IN ('information_schema', '_silt_internal') \
             ORDER BY table_schema, table_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })?;

    let mut signatures = BTreeMap::new();
    for (schema, table) in tables {
        let full_name = format!("{schema}.{table}");

        let row_count = warehouse
            .with_conn(|conn| {
                conn.query_row(
                    &format!("SELECT count(*) FROM \"{schema}\".\"{table}\""),
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .unwrap_or(-1);

        let col_hash = warehouse
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT column_name, data_type FROM information_schema.columns \
                     WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
                )?;
                let rows = stmt.query_map(duckdb::params![schema, table], |row| {
                    Ok(format!(
                        "{}:{}",
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?
                    ))
                })?;
                let mut parts = Vec::new();
                for row in rows {
                    parts.push(row?);
                }
                Ok(hash_bytes(parts.join("|").as_bytes()))
            })
            .unwrap_or_default();

        signatures.insert(full_name, TableSignature { row_count, col_hash });
    }
    Ok(signatures)
}

fn project_hash(manifest: &BTreeMap<String, String>) -> String {
    let combined = manifest
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("|");
    hash_bytes(combined.as_bytes())
}

#[derive(Debug, serde::Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub project_hash: String,
    pub file_count: usize,
    pub table_count: usize,
}

/// Captures the current project + data state under a name.
pub fn create_snapshot(
    warehouse: &Warehouse,
    project_dir: &Path,
    name: Option<String>,
) -> Result<SnapshotInfo, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let name =
        name.unwrap_or_else(|| format!("snapshot-{}", Local::now().format("%Y%m%d-%H%M%S")));
    let manifest = build_file_manifest(project_dir);
    let signatures = build_table_signatures(warehouse)?;
    let hash = project_hash(&manifest);

    meta.save_snapshot(
        &name,
        &hash,
        &serde_json::json!(signatures),
        &serde_json::json!(manifest),
    )?;

    Ok(SnapshotInfo {
        name,
        project_hash: hash,
        file_count: manifest.len(),
        table_count: signatures.len(),
    })
}

#[derive(Debug, Default, serde::Serialize)]
pub struct SnapshotDiff {
    pub snapshot: String,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_changed: Vec<String>,
    pub tables_changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_clean(&self) -> bool {
        self.files_added.is_empty()
            && self.files_removed.is_empty()
            && self.files_changed.is_empty()
            && self.tables_changed.is_empty()
    }
}

/// Current state vs a named snapshot. `None` when the snapshot is unknown.
pub fn diff_against_snapshot(
    warehouse: &Warehouse,
    project_dir: &Path,
    name: &str,
) -> Result<Option<SnapshotDiff>, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let Some((_, old_sigs_json, old_manifest_json)) = meta.get_snapshot(name)? else {
        return Ok(None);
    };
    let old_manifest: BTreeMap<String, String> = serde_json::from_value(old_manifest_json)
        .map_err(|e| SiltError::Internal(format!("corrupt snapshot manifest: {e}")))?;
    let old_sigs: BTreeMap<String, TableSignature> = serde_json::from_value(old_sigs_json)
        .map_err(|e| SiltError::Internal(format!("corrupt snapshot signatures: {e}")))?;

    let manifest = build_file_manifest(project_dir);
    let signatures = build_table_signatures(warehouse)?;

    let mut diff = SnapshotDiff {
        snapshot: name.to_string(),
        ..Default::default()
    };

    for (file, hash) in &manifest {
        match old_manifest.get(file) {
            None => diff.files_added.push(file.clone()),
            Some(old) if old != hash => diff.files_changed.push(file.clone()),
            Some(_) => {}
        }
    }
    for file in old_manifest.keys() {
        if !manifest.contains_key(file) {
            diff.files_removed.push(file.clone());
        }
    }

    for (table, sig) in &signatures {
        match old_sigs.get(table) {
            None => diff.tables_changed.push(format!("{table} (new)")),
            Some(old) if old != sig => {
                diff.tables_changed
                    .push(format!("{table} ({} -> {} rows)", old.row_count, sig.row_count));
            }
            Some(_) => {}
        }
    }
    for table in old_sigs.keys() {
        if !signatures.contains_key(table) {
            diff.tables_changed.push(format!("{table} (dropped)"));
        }
    }

    Ok(Some(diff))
}
