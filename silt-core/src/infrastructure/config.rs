// silt-core/src/infrastructure/config.rs
//
// project.yml: the single project manifest:
//
//   name: my_platform
//   database:
//     path: warehouse.duckdb
//   validation: report
//   freshness:
//     max_age_hours: 24
//   streams:
//     daily:
//       description: "Daily refresh"
//       schedule: "0 6 * * *"
//       retries: 2
//       retry_delay_seconds: 30
//       steps:
//         - seed: [all]
//         - ingest: [all]
//         - transform: [all]

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::infrastructure::error::InfrastructureError;

pub const PROJECT_FILE: &str = "project.yml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "warehouse.duckdb".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FreshnessConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,
}

fn default_max_age_hours() -> f64 {
    24.0
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
        }
    }
}

/// Whether validator findings block a run or are only reported.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Strict,
    #[default]
    Report,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Seed,
    Ingest,
    Transform,
    Export,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Seed => "seed",
            StepAction::Ingest => "ingest",
            StepAction::Transform => "transform",
            StepAction::Export => "export",
        }
    }
}

/// One stream step, written in YAML as a single-key map: `- transform: [all]`.
#[derive(Debug, Serialize, Clone)]
pub struct StreamStep {
    pub action: StepAction,
    pub targets: Vec<String>,
}

impl<'de> Deserialize<'de> for StreamStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, Vec<String>>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::custom(
                "a stream step must be a single `action: [targets]` entry",
            ));
        }
        // len() == 1 checked above
        let (action_raw, targets) = map
            .into_iter()
            .next()
            .ok_or_else(|| D::Error::custom("empty stream step"))?;
        let action = match action_raw.as_str() {
            "seed" => StepAction::Seed,
            "ingest" => StepAction::Ingest,
            "transform" => StepAction::Transform,
            "export" => StepAction::Export,
            other => {
                return Err(D::Error::custom(format!(
                    "unknown stream step action '{other}'"
                )))
            }
        };
        Ok(StreamStep { action, targets })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StreamStep>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub webhook: Option<String>,
}

fn default_retry_delay() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub streams: BTreeMap<String, StreamConfig>,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub validation: ValidationMode,
    /// Tier worker override; defaults to the logical CPU count.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl ProjectConfig {
    pub fn db_path(&self, project_dir: &Path) -> PathBuf {
        let raw = Path::new(&self.database.path);
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            project_dir.join(raw)
        }
    }
}

#[instrument(skip(project_dir))]
pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig, InfrastructureError> {
    let config_path = project_dir.join(PROJECT_FILE);
    if !config_path.exists() {
        return Err(InfrastructureError::ConfigNotFound(format!(
            "{}",
            config_path.display()
        )));
    }
    info!(path = ?config_path, "Loading project manifest");

    let content = fs::read_to_string(&config_path)?;
    let mut config: ProjectConfig = serde_yaml::from_str(&content)?;

    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut ProjectConfig) {
    // SILT_DB_PATH=/tmp/scratch.duckdb silt run
    if let Ok(val) = std::env::var("SILT_DB_PATH") {
        info!(old = %config.database.path, new = %val, "Overriding database path via ENV");
        config.database.path = val;
    }
    if let Ok(val) = std::env::var("SILT_WORKERS") {
        if let Ok(parsed) = val.parse::<usize>() {
            config.workers = Some(parsed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: test_platform
database:
  path: data/warehouse.duckdb
validation: strict
streams:
  daily:
    description: "Daily refresh"
    schedule: "0 6 * * *"
    retries: 2
    steps:
      - ingest: [all]
      - transform: [all]
  manual:
    steps:
      - transform: [gold.dim_users]
"#;

    #[test]
    fn test_parse_project_yaml() {
        let config: ProjectConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.name, "test_platform");
        assert_eq!(config.database.path, "data/warehouse.duckdb");
        assert_eq!(config.validation, ValidationMode::Strict);
        assert_eq!(config.streams.len(), 2);

        let daily = &config.streams["daily"];
        assert_eq!(daily.schedule.as_deref(), Some("0 6 * * *"));
        assert_eq!(daily.retries, 2);
        assert_eq!(daily.retry_delay_seconds, 10);
        assert_eq!(daily.steps.len(), 2);
        assert_eq!(daily.steps[0].action, StepAction::Ingest);
        assert_eq!(daily.steps[1].targets, vec!["all"]);

        let manual = &config.streams["manual"];
        assert!(manual.schedule.is_none());
        assert_eq!(manual.steps[0].targets, vec!["gold.dim_users"]);
    }

    #[test]
    fn test_unknown_step_action_fails() {
        let yaml = "name: t\nstreams:\n  s:\n    steps:\n      - explode: [all]\n";
        let result: Result<ProjectConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let config: ProjectConfig = serde_yaml::from_str("name: bare").unwrap();
        assert_eq!(config.database.path, "warehouse.duckdb");
        assert_eq!(config.validation, ValidationMode::Report);
        assert!((config.freshness.max_age_hours - 24.0).abs() < f64::EPSILON);
        assert!(config.streams.is_empty());
    }

    #[test]
    fn test_load_from_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PROJECT_FILE), SAMPLE).unwrap();
        let config = load_project_config(tmp.path()).unwrap();
        assert_eq!(config.name, "test_platform");
        assert!(config
            .db_path(tmp.path())
            .ends_with("data/warehouse.duckdb"));
    }

    #[test]
    fn test_missing_config_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_project_config(tmp.path()).is_err());
    }
}
