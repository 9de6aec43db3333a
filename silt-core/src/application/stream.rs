// silt-core/src/application/stream.rs
//
// The pipeline orchestrator. A stream is an ordered list of steps
// (seed / ingest / transform / export); steps run sequentially with
// per-step retry, and a failing step skips the rest of the stream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::application::seed::{run_seeds, SeedStatus};
use crate::application::transform::{run_transform, CancelToken, RunOptions, TransformReport};
use crate::error::SiltError;
use crate::infrastructure::config::{ProjectConfig, StepAction, StreamConfig, StreamStep};
use crate::infrastructure::meta::{MetaStore, RunRecord};
use crate::infrastructure::warehouse::Warehouse;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScriptResult {
    pub script: String,
    pub status: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub log_output: String,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Transform(TransformReport),
    Seeds(BTreeMap<String, SeedStatus>),
    Scripts(Vec<ScriptResult>),
}

#[derive(Debug, serde::Serialize)]
pub struct StepReport {
    pub action: String,
    pub attempts: u32,
    pub outcome: Option<StepOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Success,
    Failed,
}

#[derive(Debug, serde::Serialize)]
pub struct StreamReport {
    pub stream: String,
    pub status: StreamStatus,
    pub steps: Vec<StepReport>,
    pub duration_seconds: f64,
    /// Configured completion webhook, surfaced for an external notifier.
    pub webhook: Option<String>,
}

/// Runs one named stream to completion.
pub async fn run_stream(
    warehouse: &Warehouse,
    project_dir: &Path,
    config: &ProjectConfig,
    stream_name: &str,
    force: bool,
    cancel: CancelToken,
) -> Result<StreamReport, SiltError> {
    let stream: &StreamConfig = config
        .streams
        .get(stream_name)
        .ok_or_else(|| SiltError::Internal(format!("stream '{stream_name}' not found")))?;

    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    info!("stream {stream_name}: {} steps", stream.steps.len());
    let start = Instant::now();
    let mut steps = Vec::with_capacity(stream.steps.len());
    let mut status = StreamStatus::Success;

    for step in &stream.steps {
        if cancel.is_cancelled() {
            status = StreamStatus::Failed;
            steps.push(StepReport {
                action: step.action.as_str().to_string(),
                attempts: 0,
                outcome: None,
                error: Some("cancelled".into()),
            });
            break;
        }

        let report = run_step_with_retries(
            warehouse,
            project_dir,
            step,
            stream.retries,
            stream.retry_delay_seconds,
            force,
            &cancel,
        )
        .await;

        let failed = report.error.is_some();
        steps.push(report);
        if failed {
            error!("stream {stream_name}: step failed, skipping remaining steps");
            status = StreamStatus::Failed;
            break;
        }
    }

    let duration_seconds = start.elapsed().as_secs_f64();
    let _ = meta.log_run(&RunRecord {
        run_type: "stream".into(),
        target: stream_name.into(),
        status: match status {
            StreamStatus::Success => "success",
            StreamStatus::Failed => "failed",
        }
        .into(),
        duration_ms: (duration_seconds * 1000.0) as i64,
        ..Default::default()
    });

    if let Some(url) = &stream.webhook {
        info!("stream {stream_name} finished; completion event for webhook {url}");
    }

    Ok(StreamReport {
        stream: stream_name.to_string(),
        status,
        steps,
        duration_seconds,
        webhook: stream.webhook.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_step_with_retries(
    warehouse: &Warehouse,
    project_dir: &Path,
    step: &StreamStep,
    retries: u32,
    retry_delay_seconds: u64,
    force: bool,
    cancel: &CancelToken,
) -> StepReport {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match run_step(warehouse, project_dir, step, force, cancel).await {
            Ok(outcome) => {
                return StepReport {
                    action: step.action.as_str().to_string(),
                    attempts,
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) if attempts <= retries && !cancel.is_cancelled() => {
                warn!(
                    "step {} attempt {attempts} failed ({e}), retrying in {retry_delay_seconds}s",
                    step.action.as_str()
                );
                tokio::time::sleep(Duration::from_secs(retry_delay_seconds)).await;
            }
            Err(e) => {
                return StepReport {
                    action: step.action.as_str().to_string(),
                    attempts,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

async fn run_step(
    warehouse: &Warehouse,
    project_dir: &Path,
    step: &StreamStep,
    force: bool,
    cancel: &CancelToken,
) -> Result<StepOutcome, SiltError> {
    let targets = if step.targets.is_empty() || step.targets == ["all"] {
        None
    } else {
        Some(step.targets.clone())
    };

    match step.action {
        StepAction::Seed => {
            let results =
                run_seeds(warehouse, &project_dir.join("seeds"), targets.as_deref(), force).await?;
            if let Some((name, SeedStatus::Error(e))) = results
                .iter()
                .find(|(_, s)| matches!(s, SeedStatus::Error(_)))
                .map(|(n, s)| (n.clone(), s.clone()))
            {
                return Err(SiltError::Internal(format!("seed {name} failed: {e}")));
            }
            Ok(StepOutcome::Seeds(results))
        }
        StepAction::Transform => {
            let report = run_transform(
                warehouse,
                &project_dir.join("transform"),
                RunOptions {
                    targets,
                    force,
                    workers: None,
                    cancel: cancel.clone(),
                },
            )
            .await?;
            if !report.success() {
                let failed: Vec<&str> = report
                    .results
                    .iter()
                    .filter(|(_, s)| s.blocks_downstream())
                    .map(|(n, _)| n.as_str())
                    .collect();
                return Err(SiltError::Internal(format!(
                    "transform failed for: {}",
                    failed.join(", ")
                )));
            }
            Ok(StepOutcome::Transform(report))
        }
        StepAction::Ingest => {
            let results = run_scripts_in_dir(
                warehouse,
                project_dir,
                "ingest",
                targets.as_deref(),
                true,
            )
            .await?;
            if results.iter().any(|r| r.status == "error") {
                return Err(SiltError::Internal("ingest script failed".into()));
            }
            Ok(StepOutcome::Scripts(results))
        }
        StepAction::Export => {
            let results = run_scripts_in_dir(
                warehouse,
                project_dir,
                "export",
                targets.as_deref(),
                false,
            )
            .await?;
            if results.iter().any(|r| r.status == "error") {
                return Err(SiltError::Internal("export script failed".into()));
            }
            Ok(StepOutcome::Scripts(results))
        }
    }
}

/// Runs the opaque connector scripts in `<project>/<dir>`, sorted by name,
/// `_`-prefixed files skipped. `stop_on_error` halts the batch on the first
/// failure (ingest keeps data integrity; export keeps going is a caller
/// choice).
pub async fn run_scripts_in_dir(
    warehouse: &Warehouse,
    project_dir: &Path,
    dir: &str,
    targets: Option<&[String]>,
    stop_on_error: bool,
) -> Result<Vec<ScriptResult>, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let scripts_dir = project_dir.join(dir);
    let mut results = Vec::new();
    if !scripts_dir.exists() {
        info!("no {dir}/ directory found");
        return Ok(results);
    }

    let mut scripts: Vec<PathBuf> = std::fs::read_dir(&scripts_dir)
        .map_err(SiltError::from)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "py" || e == "sh")
                && !p
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('_'))
                    .unwrap_or(true)
        })
        .collect();
    scripts.sort();

    if let Some(filter) = targets {
        scripts.retain(|p| {
            p.file_stem()
                .map(|s| filter.iter().any(|t| t == &s.to_string_lossy()))
                .unwrap_or(false)
        });
    }

    for script in scripts {
        let result = run_script(warehouse, &meta, project_dir, &script, dir).await;
        let errored = result.status == "error";
        results.push(result);
        if errored && stop_on_error {
            warn!("stopping: {dir} script failed");
            break;
        }
    }
    Ok(results)
}

async fn run_script(
    warehouse: &Warehouse,
    meta: &MetaStore,
    project_dir: &Path,
    script: &Path,
    kind: &str,
) -> ScriptResult {
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    info!("running {kind} script {name}");
    let start = Instant::now();

    let mut command = match script.extension().and_then(|e| e.to_str()) {
        Some("py") => {
            let mut c = Command::new("python3");
            c.arg(script);
            c
        }
        _ => {
            let mut c = Command::new("sh");
            c.arg(script);
            c
        }
    };
    command
        .current_dir(project_dir)
        .env("SILT_DB_PATH", warehouse.path());

    let output = command.output().await;
    let duration_ms = start.elapsed().as_millis() as i64;

    let (status, error, log_output) = match output {
        Ok(out) => {
            let mut log = String::from_utf8_lossy(&out.stdout).to_string();
            log.push_str(&String::from_utf8_lossy(&out.stderr));
            if out.status.success() {
                ("success".to_string(), None, log)
            } else {
                (
                    "error".to_string(),
                    Some(format!("exit status {}", out.status)),
                    log,
                )
            }
        }
        Err(e) => ("error".to_string(), Some(e.to_string()), String::new()),
    };

    let _ = meta.log_run(&RunRecord {
        run_type: kind.into(),
        target: name.clone(),
        status: status.clone(),
        duration_ms,
        error: error.clone(),
        log_output: if log_output.is_empty() {
            None
        } else {
            Some(log_output.clone())
        },
        ..Default::default()
    });

    ScriptResult {
        script: name,
        status,
        duration_ms,
        error,
        log_output,
    }
}
