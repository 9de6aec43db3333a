// silt-core/src/infrastructure/discovery.rs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::domain::contract::{Contract, ContractFile};
use crate::domain::directive::{parse_source, DirectiveIssue};
use crate::domain::error::DomainError;
use crate::domain::model::{fingerprint, is_identifier, Materialization, SqlModel};
use crate::error::SiltError;
use crate::infrastructure::error::InfrastructureError;

pub struct ModelDiscovery;

impl ModelDiscovery {
    /// Walks `transform/` recursively for `*.sql` files in stable path
    /// order. The logical schema defaults to the file's parent directory
    /// name; a `schema=` directive overrides it.
    ///
    /// Duplicate `full_name`s are rejected here: letting two files race for
    /// one relation is never recoverable downstream.
    pub fn discover(transform_dir: &Path) -> Result<Vec<SqlModel>, SiltError> {
        let mut models: Vec<SqlModel> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        if !transform_dir.exists() {
            debug!("transform directory {:?} does not exist", transform_dir);
            return Ok(models);
        }

        let mut sql_files: Vec<PathBuf> = WalkDir::new(transform_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "sql"))
            .map(|e| e.path().to_path_buf())
            .collect();
        sql_files.sort();

        for path in sql_files {
            let model = Self::parse_sql_file(&path, transform_dir)?;
            if let Some(first) = seen.get(&model.full_name) {
                return Err(SiltError::Domain(DomainError::DuplicateModel {
                    full_name: model.full_name,
                    first: first.clone(),
                    second: path,
                }));
            }
            seen.insert(model.full_name.clone(), path);
            models.push(model);
        }

        Ok(models)
    }

    fn parse_sql_file(path: &Path, transform_dir: &Path) -> Result<SqlModel, SiltError> {
        let sql = fs::read_to_string(path).map_err(InfrastructureError::Io)?;

        let name = path
            .file_stem()
            .ok_or_else(|| {
                SiltError::Internal(format!("invalid model filename: {}", path.display()))
            })?
            .to_string_lossy()
            .to_string();

        let parsed = parse_source(&sql);
        let mut directive_errors = parsed.issues.clone();

        // Folder convention: transform/<schema>/<name>.sql
        let folder_schema = path
            .strip_prefix(transform_dir)
            .ok()
            .and_then(|rel| rel.parent())
            .and_then(|parent| parent.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "public".to_string());

        let schema = parsed.directives.schema.clone().unwrap_or(folder_schema);

        if !is_identifier(&name) {
            directive_errors.push(DirectiveIssue::new(
                1,
                format!("model name '{name}' is not a valid identifier"),
            ));
        }
        if !is_identifier(&schema) {
            directive_errors.push(DirectiveIssue::new(
                1,
                format!("schema '{schema}' is not a valid identifier"),
            ));
        }

        let materialized = parsed
            .directives
            .materialized
            .clone()
            .unwrap_or(Materialization::View);

        let content_hash = fingerprint(&parsed.query);

        Ok(SqlModel {
            path: path.to_path_buf(),
            full_name: format!("{schema}.{name}"),
            name,
            schema,
            sql,
            query: parsed.query,
            materialized,
            unique_key: parsed.directives.unique_key,
            incremental_strategy: parsed.directives.incremental_strategy,
            partition_by: parsed.directives.partition_by,
            incremental_filter: parsed.directives.incremental_filter,
            depends_on: parsed.directives.depends_on,
            assertions: parsed.directives.assertions,
            description: parsed.directives.description,
            column_docs: parsed.directives.column_docs,
            content_hash,
            upstream_hash: String::new(),
            directive_errors,
        })
    }
}

/// Discovers contract documents under `contracts/*.yml`. Unparseable files
/// are skipped with a warning; a broken contract must never take the engine
/// down with it.
pub fn discover_contracts(contracts_dir: &Path) -> Vec<Contract> {
    let mut contracts = Vec::new();
    if !contracts_dir.exists() {
        return contracts;
    }

    let mut yml_files: Vec<PathBuf> = fs::read_dir(contracts_dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml")
        })
        .collect();
    yml_files.sort();

    for path in yml_files {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to read contract file {:?}: {e}", path);
                continue;
            }
        };
        match serde_yaml::from_str::<ContractFile>(&content) {
            Ok(file) => {
                for mut contract in file.contracts {
                    if contract.name.is_empty() {
                        contract.name = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default();
                    }
                    contract.path = Some(path.clone());
                    contracts.push(contract);
                }
            }
            Err(e) => warn!("failed to parse contract file {:?}: {e}", path),
        }
    }

    contracts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::model::IncrementalStrategy;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_discover_uses_folder_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "bronze/users.sql",
            "-- config: materialized=view\n-- depends_on: landing.users\nSELECT 1",
        );

        let models = ModelDiscovery::discover(&transform).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].schema, "bronze");
        assert_eq!(models[0].full_name, "bronze.users");
        assert_eq!(models[0].materialized, Materialization::View);
        assert!(models[0].directive_errors.is_empty());
    }

    #[test]
    fn test_schema_directive_overrides_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "misc/orders.sql",
            "-- config: materialized=table, schema=silver\nSELECT 1",
        );

        let models = ModelDiscovery::discover(&transform).unwrap();
        assert_eq!(models[0].full_name, "silver.orders");
    }

    #[test]
    fn test_incremental_config_carries_through() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(
            &transform,
            "gold/events.sql",
            "-- config: materialized=incremental, unique_key=id, partition_by=event_date\n\
             -- depends_on: landing.raw\n\
             SELECT id, name, event_date FROM landing.raw",
        );

        let models = ModelDiscovery::discover(&transform).unwrap();
        let model = &models[0];
        assert_eq!(model.materialized, Materialization::Incremental);
        assert_eq!(model.unique_key.as_deref(), Some("id"));
        assert_eq!(model.partition_by.as_deref(), Some("event_date"));
        assert_eq!(model.strategy(), IncrementalStrategy::Merge);
    }

    #[test]
    fn test_duplicate_full_name_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(&transform, "bronze/users.sql", "SELECT 1");
        write(
            &transform,
            "other/users.sql",
            "-- config: schema=bronze\nSELECT 2",
        );

        let err = ModelDiscovery::discover(&transform).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let models = ModelDiscovery::discover(&tmp.path().join("transform")).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn test_stable_order() {
        let tmp = tempfile::tempdir().unwrap();
        let transform = tmp.path().join("transform");
        write(&transform, "bronze/b.sql", "SELECT 1");
        write(&transform, "bronze/a.sql", "SELECT 1");
        write(&transform, "gold/z.sql", "SELECT 1");

        let models = ModelDiscovery::discover(&transform).unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.full_name.as_str()).collect();
        assert_eq!(names, vec!["bronze.a", "bronze.b", "gold.z"]);
    }

    #[test]
    fn test_discover_contracts() {
        let tmp = tempfile::tempdir().unwrap();
        let contracts_dir = tmp.path().join("contracts");
        fs::create_dir_all(&contracts_dir).unwrap();
        fs::write(
            contracts_dir.join("orders.yml"),
            "contracts:\n  - name: orders_not_empty\n    model: gold.orders\n    assertions:\n      - row_count > 0\n",
        )
        .unwrap();
        fs::write(contracts_dir.join("broken.yml"), "contracts: [not, a, contract]").unwrap();

        let contracts = discover_contracts(&contracts_dir);
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].name, "orders_not_empty");
        assert!(contracts[0].path.is_some());
    }
}
