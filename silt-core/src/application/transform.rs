// silt-core/src/application/transform.rs
//
// The transform run: discovery -> directive gate -> DAG plan -> tiered
// parallel execution with change detection, profiling, assertions and
// metadata writes.

use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::materializer::Materializer;
use crate::application::profiler::profile_model;
use crate::application::quality::run_assertions;
use crate::domain::error::DomainError;
use crate::domain::graph::{compute_upstream_hashes, DagPlan};
use crate::domain::model::SqlModel;
use crate::error::SiltError;
use crate::infrastructure::discovery::ModelDiscovery;
use crate::infrastructure::meta::{MetaStore, ModelState, RunRecord};
use crate::infrastructure::warehouse::Warehouse;

/// Cooperative cancellation flag, observed between statements. Cloning
/// shares the flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of one model in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStatus {
    Built,
    Skipped,
    Error(String),
    AssertionFailed,
    Cancelled,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Built => "built",
            ModelStatus::Skipped => "skipped",
            ModelStatus::Error(_) => "error",
            ModelStatus::AssertionFailed => "assertion_failed",
            ModelStatus::Cancelled => "cancelled",
        }
    }

    /// Failure here blocks descendants for the rest of the run.
    pub fn blocks_downstream(&self) -> bool {
        matches!(
            self,
            ModelStatus::Error(_) | ModelStatus::AssertionFailed | ModelStatus::Cancelled
        )
    }
}

impl serde::Serialize for ModelStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Default)]
pub struct RunOptions {
    /// Model names (`name` or `schema.name`) to run; None or `["all"]`
    /// means everything.
    pub targets: Option<Vec<String>>,
    pub force: bool,
    /// Tier worker cap; defaults to the logical CPU count.
    pub workers: Option<usize>,
    pub cancel: CancelToken,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct TransformReport {
    pub results: BTreeMap<String, ModelStatus>,
}

impl TransformReport {
    pub fn success(&self) -> bool {
        !self
            .results
            .values()
            .any(|s| matches!(s, ModelStatus::Error(_) | ModelStatus::AssertionFailed))
    }

    pub fn built(&self) -> usize {
        self.results
            .values()
            .filter(|s| matches!(s, ModelStatus::Built))
            .count()
    }
}

/// Runs the transform pipeline over `transform_dir`.
pub async fn run_transform(
    warehouse: &Warehouse,
    transform_dir: &Path,
    options: RunOptions,
) -> Result<TransformReport, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let mut models = ModelDiscovery::discover(transform_dir)?;
    if models.is_empty() {
        info!("no SQL models found in {:?}", transform_dir);
        return Ok(TransformReport::default());
    }

    // Directive errors fail fast, before any DDL runs.
    for model in &models {
        if let Some(issue) = model.directive_errors.first() {
            return Err(SiltError::Domain(DomainError::Parse {
                path: model.path.clone(),
                line: issue.line,
                message: issue.message.clone(),
            }));
        }
    }

    if let Some(targets) = &options.targets {
        if !targets.is_empty() && targets != &["all".to_string()] {
            let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
            models.retain(|m| {
                wanted.contains(m.full_name.as_str()) || wanted.contains(m.name.as_str())
            });
        }
    }

    compute_upstream_hashes(&mut models);
    let plan = DagPlan::plan(&models)?;
    let by_name: BTreeMap<String, SqlModel> = models
        .into_iter()
        .map(|m| (m.full_name.clone(), m))
        .collect();

    info!(
        "execution plan: {} models in {} tiers",
        plan.order.len(),
        plan.tiers.len()
    );

    let mut report = TransformReport::default();
    let mut blocked: HashSet<String> = HashSet::new();

    'tiers: for (tier_idx, tier) in plan.tiers.iter().enumerate() {
        let mut runnable: Vec<SqlModel> = Vec::new();
        for name in tier {
            if blocked.contains(name) {
                debug!("skip {name}: upstream failed");
                report
                    .results
                    .insert(name.clone(), ModelStatus::Skipped);
                continue;
            }
            if let Some(model) = by_name.get(name) {
                runnable.push(model.clone());
            }
        }
        if runnable.is_empty() {
            continue;
        }

        if options.cancel.is_cancelled() {
            for model in &runnable {
                report
                    .results
                    .insert(model.full_name.clone(), ModelStatus::Cancelled);
            }
            break 'tiers;
        }

        let workers = options
            .workers
            .unwrap_or_else(num_cpus::get)
            .clamp(1, runnable.len());
        debug!("tier {tier_idx}: {} models, {workers} workers", runnable.len());

        let futures = runnable.into_iter().map(|model| {
            let warehouse = warehouse.clone();
            let meta = meta.clone();
            let force = options.force;
            let cancel = options.cancel.clone();
            async move {
                let name = model.full_name.clone();
                let status = execute_model(&warehouse, &meta, &model, force, &cancel).await;
                (name, status)
            }
        });

        let mut stream = futures::stream::iter(futures).buffer_unordered(workers);
        while let Some((name, status)) = stream.next().await {
            match &status {
                ModelStatus::Built => info!("built {name}"),
                ModelStatus::Skipped => info!("skipped {name} (unchanged)"),
                ModelStatus::Error(e) => error!("failed {name}: {e}"),
                ModelStatus::AssertionFailed => warn!("assertion failed on {name}"),
                ModelStatus::Cancelled => warn!("cancelled {name}"),
            }
            if status.blocks_downstream() {
                blocked.extend(plan.descendants(&name));
            }
            report.results.insert(name, status);
        }
    }

    warehouse.checkpoint();
    info!(
        "transform finished: {} built, {} total",
        report.built(),
        report.results.len()
    );
    Ok(report)
}

/// Change detection: rebuild iff forced, never built, or either fingerprint
/// moved.
fn needs_rebuild(meta: &MetaStore, model: &SqlModel, force: bool) -> Result<bool, SiltError> {
    if force {
        return Ok(true);
    }
    match meta.get_model_state(&model.full_name)? {
        None => Ok(true),
        Some(state) => Ok(state.content_hash != model.content_hash
            || state.upstream_hash != model.upstream_hash),
    }
}

async fn execute_model(
    warehouse: &Warehouse,
    meta: &MetaStore,
    model: &SqlModel,
    force: bool,
    cancel: &CancelToken,
) -> ModelStatus {
    match needs_rebuild(meta, model, force) {
        Ok(false) => return ModelStatus::Skipped,
        Ok(true) => {}
        Err(e) => return ModelStatus::Error(e.to_string()),
    }

    if cancel.is_cancelled() {
        return ModelStatus::Cancelled;
    }

    // --- MATERIALIZE ---
    let outcome = match Materializer::materialize(warehouse, model).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = meta.log_run(&RunRecord {
                run_type: "transform".into(),
                target: model.full_name.clone(),
                status: "error".into(),
                error: Some(e.to_string()),
                ..Default::default()
            });
            return ModelStatus::Error(e.to_string());
        }
    };

    if cancel.is_cancelled() {
        return ModelStatus::Cancelled;
    }

    // --- PROFILE (non-fatal) ---
    if outcome.materialized_as != "view" {
        match profile_model(warehouse, &model.full_name).await {
            Ok(profile) => {
                if let Err(e) = meta.save_profile(
                    &model.full_name,
                    profile.row_count,
                    profile.column_count,
                    &profile.null_percentages_json(),
                    &profile.distinct_counts_json(),
                ) {
                    warn!("failed to persist profile for {}: {e}", model.full_name);
                }
            }
            Err(e) => warn!("profiling {} failed: {e}", model.full_name),
        }
    }

    // --- ASSERTIONS ---
    let assertion_outcomes = run_assertions(warehouse, &model.full_name, &model.assertions).await;
    for a in &assertion_outcomes {
        if let Err(e) = meta.record_assertion(&model.full_name, &a.expression, a.passed, &a.detail)
        {
            warn!("failed to persist assertion result: {e}");
        }
    }
    if assertion_outcomes.iter().any(|a| !a.passed) {
        let _ = meta.log_run(&RunRecord {
            run_type: "transform".into(),
            target: model.full_name.clone(),
            status: "assertion_failed".into(),
            duration_ms: outcome.duration_ms,
            rows_affected: outcome.row_count,
            ..Default::default()
        });
        // No model_state update: the model re-runs until its data is clean.
        return ModelStatus::AssertionFailed;
    }

    // --- METADATA ---
    let state = ModelState {
        full_name: model.full_name.clone(),
        content_hash: model.content_hash.clone(),
        upstream_hash: model.upstream_hash.clone(),
        materialized_as: outcome.materialized_as.clone(),
        run_duration_ms: outcome.duration_ms,
        row_count: outcome.row_count,
    };
    if let Err(e) = meta.upsert_model_state(&state) {
        return ModelStatus::Error(e.to_string());
    }
    let _ = meta.log_run(&RunRecord {
        run_type: "transform".into(),
        target: model.full_name.clone(),
        status: "success".into(),
        duration_ms: outcome.duration_ms,
        rows_affected: outcome.row_count,
        ..Default::default()
    });

    ModelStatus::Built
}
