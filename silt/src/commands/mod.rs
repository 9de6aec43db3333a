// silt/src/commands/mod.rs

pub mod contracts;
pub mod diff;
pub mod freshness;
pub mod lineage;
pub mod query;
pub mod run;
pub mod schedule;
pub mod seed;
pub mod snapshot;
pub mod stream;
pub mod validate;

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;

use silt_core::infrastructure::config::{load_project_config, ProjectConfig};
use silt_core::infrastructure::error::InfrastructureError;
use silt_core::infrastructure::warehouse::Warehouse;

/// Loads project.yml, falling back to defaults when the project has none
/// (a bare transform/ directory is a valid project).
pub(crate) fn load_config(project_dir: &Path) -> anyhow::Result<ProjectConfig> {
    match load_project_config(project_dir) {
        Ok(config) => Ok(config),
        Err(InfrastructureError::ConfigNotFound(_)) => Ok(ProjectConfig {
            name: "silt".to_string(),
            database: Default::default(),
            streams: BTreeMap::new(),
            freshness: Default::default(),
            validation: Default::default(),
            workers: None,
        }),
        Err(e) => Err(e).context("failed to load project.yml"),
    }
}

pub(crate) fn open_warehouse(
    project_dir: &Path,
    config: &ProjectConfig,
) -> anyhow::Result<Warehouse> {
    let db_path = config.db_path(project_dir);
    Warehouse::open(&db_path.to_string_lossy())
        .with_context(|| format!("failed to open warehouse at {}", db_path.display()))
}
