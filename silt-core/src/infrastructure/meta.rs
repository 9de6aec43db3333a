// silt-core/src/infrastructure/meta.rs
//
// The `_silt_internal` schema: model fingerprints, run log, profiles,
// assertion and contract outcomes, snapshots. Consumers treat these tables
// as read-only; column additions are forward-compatible.

use duckdb::params;

use crate::error::SiltError;
use crate::infrastructure::warehouse::Warehouse;

pub const META_SCHEMA: &str = "_silt_internal";

const META_DDL: &str = "
CREATE SCHEMA IF NOT EXISTS _silt_internal;

CREATE TABLE IF NOT EXISTS _silt_internal.model_state (
    full_name       VARCHAR PRIMARY KEY,
    content_hash    VARCHAR NOT NULL,
    upstream_hash   VARCHAR NOT NULL,
    materialized_as VARCHAR NOT NULL,
    last_run_at     TIMESTAMP DEFAULT current_timestamp,
    run_duration_ms BIGINT DEFAULT 0,
    row_count       BIGINT DEFAULT 0
);

CREATE TABLE IF NOT EXISTS _silt_internal.run_log (
    id            VARCHAR DEFAULT gen_random_uuid()::VARCHAR,
    run_type      VARCHAR NOT NULL,
    target        VARCHAR NOT NULL,
    status        VARCHAR NOT NULL,
    started_at    TIMESTAMP DEFAULT current_timestamp,
    finished_at   TIMESTAMP,
    duration_ms   BIGINT,
    rows_affected BIGINT DEFAULT 0,
    error         VARCHAR,
    log_output    VARCHAR
);

CREATE TABLE IF NOT EXISTS _silt_internal.model_profiles (
    full_name        VARCHAR PRIMARY KEY,
    row_count        BIGINT DEFAULT 0,
    column_count     INTEGER DEFAULT 0,
    null_percentages VARCHAR,
    distinct_counts  VARCHAR,
    profiled_at      TIMESTAMP DEFAULT current_timestamp
);

CREATE TABLE IF NOT EXISTS _silt_internal.assertion_results (
    id         VARCHAR DEFAULT gen_random_uuid()::VARCHAR,
    model_path VARCHAR NOT NULL,
    expression VARCHAR NOT NULL,
    passed     BOOLEAN NOT NULL,
    detail     VARCHAR,
    checked_at TIMESTAMP DEFAULT current_timestamp
);

CREATE TABLE IF NOT EXISTS _silt_internal.contract_results (
    id            VARCHAR DEFAULT gen_random_uuid()::VARCHAR,
    contract_name VARCHAR NOT NULL,
    model         VARCHAR NOT NULL,
    passed        BOOLEAN NOT NULL,
    severity      VARCHAR NOT NULL,
    detail        VARCHAR,
    checked_at    TIMESTAMP DEFAULT current_timestamp
);

CREATE TABLE IF NOT EXISTS _silt_internal.snapshots (
    name             VARCHAR PRIMARY KEY,
    created_at       TIMESTAMP DEFAULT current_timestamp,
    project_hash     VARCHAR,
    table_signatures VARCHAR,
    file_manifest    VARCHAR
);
";

/// Last successful build fingerprint for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub full_name: String,
    pub content_hash: String,
    pub upstream_hash: String,
    pub materialized_as: String,
    pub run_duration_ms: i64,
    pub row_count: i64,
}

/// One `run_log` append.
#[derive(Debug, Default)]
pub struct RunRecord {
    pub run_type: String,
    pub target: String,
    pub status: String,
    pub duration_ms: i64,
    pub rows_affected: i64,
    pub error: Option<String>,
    pub log_output: Option<String>,
}

/// Structured writers for the internal schema.
#[derive(Clone)]
pub struct MetaStore {
    warehouse: Warehouse,
}

impl MetaStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// Idempotent creation of every internal table.
    pub fn ensure_meta_tables(&self) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| conn.execute_batch(META_DDL))
    }

    pub fn get_model_state(&self, full_name: &str) -> Result<Option<ModelState>, SiltError> {
        self.warehouse.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT full_name, content_hash, upstream_hash, materialized_as, \
                        run_duration_ms, row_count \
                 FROM _silt_internal.model_state WHERE full_name = ?",
            )?;
            let mut rows = stmt.query(params![full_name])?;
            match rows.next()? {
                None => Ok(None),
                Some(row) => Ok(Some(ModelState {
                    full_name: row.get(0)?,
                    content_hash: row.get(1)?,
                    upstream_hash: row.get(2)?,
                    materialized_as: row.get(3)?,
                    run_duration_ms: row.get(4)?,
                    row_count: row.get(5)?,
                })),
            }
        })
    }

    /// Records a successful materialization. `last_run_at` is stamped by the
    /// warehouse clock.
    pub fn upsert_model_state(&self, state: &ModelState) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO _silt_internal.model_state \
                 (full_name, content_hash, upstream_hash, materialized_as, \
                  last_run_at, run_duration_ms, row_count) \
                 VALUES (?, ?, ?, ?, current_timestamp, ?, ?)",
                params![
                    state.full_name,
                    state.content_hash,
                    state.upstream_hash,
                    state.materialized_as,
                    state.run_duration_ms,
                    state.row_count
                ],
            )
            .map(|_| ())
        })
    }

    pub fn log_run(&self, record: &RunRecord) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT INTO _silt_internal.run_log \
                 (run_type, target, status, finished_at, duration_ms, rows_affected, error, log_output) \
                 VALUES (?, ?, ?, current_timestamp, ?, ?, ?, ?)",
                params![
                    record.run_type,
                    record.target,
                    record.status,
                    record.duration_ms,
                    record.rows_affected,
                    record.error,
                    record.log_output
                ],
            )
            .map(|_| ())
        })
    }

    /// Full-replace write of a model's profile.
    pub fn save_profile(
        &self,
        full_name: &str,
        row_count: i64,
        column_count: i64,
        null_percentages: &serde_json::Value,
        distinct_counts: &serde_json::Value,
    ) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO _silt_internal.model_profiles \
                 (full_name, row_count, column_count, null_percentages, distinct_counts, profiled_at) \
                 VALUES (?, ?, ?, ?, ?, current_timestamp)",
                params![
                    full_name,
                    row_count,
                    column_count,
                    null_percentages.to_string(),
                    distinct_counts.to_string()
                ],
            )
            .map(|_| ())
        })
    }

    pub fn record_assertion(
        &self,
        model_path: &str,
        expression: &str,
        passed: bool,
        detail: &str,
    ) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT INTO _silt_internal.assertion_results \
                 (model_path, expression, passed, detail) VALUES (?, ?, ?, ?)",
                params![model_path, expression, passed, detail],
            )
            .map(|_| ())
        })
    }

    pub fn record_contract(
        &self,
        contract_name: &str,
        model: &str,
        passed: bool,
        severity: &str,
        detail: &serde_json::Value,
    ) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT INTO _silt_internal.contract_results \
                 (contract_name, model, passed, severity, detail) VALUES (?, ?, ?, ?, ?)",
                params![contract_name, model, passed, severity, detail.to_string()],
            )
            .map(|_| ())
        })
    }

    pub fn save_snapshot(
        &self,
        name: &str,
        project_hash: &str,
        table_signatures: &serde_json::Value,
        file_manifest: &serde_json::Value,
    ) -> Result<(), SiltError> {
        self.warehouse.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO _silt_internal.snapshots \
                 (name, created_at, project_hash, table_signatures, file_manifest) \
                 VALUES (?, current_timestamp, ?, ?, ?)",
                params![
                    name,
                    project_hash,
                    table_signatures.to_string(),
                    file_manifest.to_string()
                ],
            )
            .map(|_| ())
        })
    }

    /// Returns `(project_hash, table_signatures, file_manifest)`.
    pub fn get_snapshot(
        &self,
        name: &str,
    ) -> Result<Option<(String, serde_json::Value, serde_json::Value)>, SiltError> {
        let raw = self.warehouse.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT project_hash, table_signatures, file_manifest \
                 FROM _silt_internal.snapshots WHERE name = ?",
            )?;
            let mut rows = stmt.query(params![name])?;
            match rows.next()? {
                None => Ok(None),
                Some(row) => Ok(Some((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))),
            }
        })?;

        match raw {
            None => Ok(None),
            Some((hash, sigs, manifest)) => {
                let sigs = serde_json::from_str(&sigs)
                    .map_err(|e| SiltError::Internal(format!("corrupt snapshot payload: {e}")))?;
                let manifest = serde_json::from_str(&manifest)
                    .map_err(|e| SiltError::Internal(format!("corrupt snapshot payload: {e}")))?;
                Ok(Some((hash, sigs, manifest)))
            }
        }
    }

    pub fn list_snapshots(&self) -> Result<Vec<(String, String)>, SiltError> {
        self.warehouse.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, created_at::VARCHAR FROM _silt_internal.snapshots ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}
