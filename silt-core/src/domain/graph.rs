// silt-core/src/domain/graph.rs

use crate::domain::error::DomainError;
use crate::domain::model::{fingerprint, SqlModel};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Execution plan for a model set: a deterministic topological order, the
/// level schedule used by the parallel executor, and the reversed edge map
/// used for impact analysis.
#[derive(Debug)]
pub struct DagPlan {
    /// Tier-major, lexicographic-minor linearization of the DAG.
    pub order: Vec<String>,
    /// Level schedule: tier 0 has no intra-project deps, tier k+1 depends
    /// only on tiers <= k. Each tier is an antichain.
    pub tiers: Vec<Vec<String>>,
    /// `full_name -> direct downstream models`.
    downstream: HashMap<String, Vec<String>>,
}

impl DagPlan {
    /// Plans execution for the given models. Dependencies that do not name a
    /// known model (seed/source/ingest outputs) are ignored for ordering.
    pub fn plan(models: &[SqlModel]) -> Result<DagPlan, DomainError> {
        let known: HashSet<&str> = models.iter().map(|m| m.full_name.as_str()).collect();

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut downstream: HashMap<String, Vec<String>> = HashMap::new();

        for model in models {
            in_degree.entry(model.full_name.as_str()).or_insert(0);
            downstream.entry(model.full_name.clone()).or_default();
        }

        for model in models {
            for dep in &model.depends_on {
                if known.contains(dep.as_str()) {
                    downstream
                        .entry(dep.clone())
                        .or_default()
                        .push(model.full_name.clone());
                    *in_degree.entry(model.full_name.as_str()).or_insert(0) += 1;
                }
            }
        }

        // Kahn's algorithm, layered. The queue is re-sorted per tier so ties
        // break lexicographically and plans are reproducible.
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut tiers: Vec<Vec<String>> = Vec::new();
        let mut resolved = 0usize;

        while !queue.is_empty() {
            let mut tier: Vec<&str> = queue.drain(..).collect();
            tier.sort_unstable();

            for name in &tier {
                resolved += 1;
                if let Some(next) = downstream.get(*name) {
                    for child in next {
                        if let Some(degree) = in_degree.get_mut(child.as_str()) {
                            *degree -= 1;
                            if *degree == 0 {
                                queue.push_back(child.as_str());
                            }
                        }
                    }
                }
            }
            tiers.push(tier.into_iter().map(String::from).collect());
        }

        if resolved != models.len() {
            let mut stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(name, _)| *name)
                .collect();
            stuck.sort_unstable();
            return Err(DomainError::CircularDependency(stuck.join(" -> ")));
        }

        let order = tiers.iter().flatten().cloned().collect();
        Ok(DagPlan {
            order,
            tiers,
            downstream,
        })
    }

    /// Transitive forward closure of `full_name` (BFS on reversed edges),
    /// sorted for stable output. The model itself is excluded.
    pub fn descendants(&self, full_name: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(full_name);

        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.downstream.get(current) {
                for child in children {
                    if seen.insert(child.as_str()) {
                        queue.push_back(child.as_str());
                    }
                }
            }
        }

        let mut result: Vec<String> = seen.into_iter().map(String::from).collect();
        result.sort_unstable();
        result
    }

    /// Direct downstream edges, for visualization.
    pub fn direct_downstream(&self, full_name: &str) -> &[String] {
        self.downstream
            .get(full_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Fills `upstream_hash` on every model: a fingerprint over the content
/// hashes of its known-model dependencies, sorted by dependency name. Models
/// with no declared dependencies get an empty hash.
pub fn compute_upstream_hashes(models: &mut [SqlModel]) {
    let content: HashMap<String, String> = models
        .iter()
        .map(|m| (m.full_name.clone(), m.content_hash.clone()))
        .collect();

    for model in models.iter_mut() {
        if model.depends_on.is_empty() {
            model.upstream_hash = String::new();
            continue;
        }
        let mut deps: Vec<&String> = model.depends_on.iter().collect();
        deps.sort_unstable();
        let combined: String = deps
            .iter()
            .filter_map(|d| content.get(*d).map(String::as_str))
            .collect();
        model.upstream_hash = fingerprint(&combined);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::model::Materialization;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn mock_model(full_name: &str, deps: Vec<&str>) -> SqlModel {
        let (schema, name) = full_name.split_once('.').unwrap();
        SqlModel {
            path: PathBuf::from(format!("{name}.sql")),
            name: name.into(),
            schema: schema.into(),
            full_name: full_name.into(),
            sql: String::new(),
            query: format!("SELECT 1 -- {full_name}"),
            materialized: Materialization::Table,
            unique_key: None,
            incremental_strategy: None,
            partition_by: None,
            incremental_filter: None,
            depends_on: deps.into_iter().map(String::from).collect(),
            assertions: vec![],
            description: String::new(),
            column_docs: BTreeMap::new(),
            content_hash: fingerprint(full_name),
            upstream_hash: String::new(),
            directive_errors: vec![],
        }
    }

    #[test]
    fn test_linear_chain_tiers() {
        let models = vec![
            mock_model("bronze.a", vec![]),
            mock_model("silver.b", vec!["bronze.a"]),
            mock_model("gold.c", vec!["silver.b"]),
        ];
        let plan = DagPlan::plan(&models).unwrap();
        assert_eq!(plan.tiers.len(), 3);
        assert_eq!(plan.tiers[0], vec!["bronze.a"]);
        assert_eq!(plan.tiers[1], vec!["silver.b"]);
        assert_eq!(plan.tiers[2], vec!["gold.c"]);
        assert_eq!(plan.order, vec!["bronze.a", "silver.b", "gold.c"]);
    }

    #[test]
    fn test_diamond_tiers_are_antichains() {
        let models = vec![
            mock_model("bronze.a", vec![]),
            mock_model("silver.b", vec!["bronze.a"]),
            mock_model("silver.c", vec!["bronze.a"]),
            mock_model("gold.d", vec!["silver.b", "silver.c"]),
        ];
        let plan = DagPlan::plan(&models).unwrap();
        assert_eq!(plan.tiers.len(), 3);
        assert_eq!(plan.tiers[1], vec!["silver.b", "silver.c"]);
        // order is tier-major, lexicographic-minor
        assert_eq!(
            plan.order,
            vec!["bronze.a", "silver.b", "silver.c", "gold.d"]
        );
    }

    #[test]
    fn test_external_deps_land_in_tier_zero() {
        let models = vec![mock_model("bronze.a", vec!["landing.raw", "landing.other"])];
        let plan = DagPlan::plan(&models).unwrap();
        assert_eq!(plan.tiers.len(), 1);
        assert_eq!(plan.tiers[0], vec!["bronze.a"]);
    }

    #[test]
    fn test_cycle_detection() {
        let models = vec![
            mock_model("bronze.a", vec!["silver.b"]),
            mock_model("silver.b", vec!["bronze.a"]),
        ];
        let err = DagPlan::plan(&models).unwrap_err();
        match err {
            DomainError::CircularDependency(msg) => {
                assert!(msg.contains("bronze.a"));
                assert!(msg.contains("silver.b"));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_descendants_transitive() {
        let models = vec![
            mock_model("bronze.a", vec![]),
            mock_model("silver.b", vec!["bronze.a"]),
            mock_model("silver.c", vec!["bronze.a"]),
            mock_model("gold.d", vec!["silver.b", "silver.c"]),
        ];
        let plan = DagPlan::plan(&models).unwrap();
        assert_eq!(
            plan.descendants("bronze.a"),
            vec!["gold.d", "silver.b", "silver.c"]
        );
        assert_eq!(plan.descendants("gold.d"), Vec::<String>::new());
    }

    #[test]
    fn test_upstream_hash_over_sorted_deps() {
        let mut models = vec![
            mock_model("bronze.a", vec![]),
            mock_model("bronze.b", vec![]),
            mock_model("gold.c", vec!["bronze.b", "bronze.a"]),
        ];
        compute_upstream_hashes(&mut models);
        assert!(models[0].upstream_hash.is_empty());

        let expected = {
            let a = &models[0].content_hash;
            let b = &models[1].content_hash;
            fingerprint(&format!("{a}{b}"))
        };
        assert_eq!(models[2].upstream_hash, expected);
    }

    #[test]
    fn test_upstream_hash_changes_when_dep_changes() {
        let mut models = vec![
            mock_model("bronze.a", vec![]),
            mock_model("gold.c", vec!["bronze.a"]),
        ];
        compute_upstream_hashes(&mut models);
        let before = models[1].upstream_hash.clone();

        models[0].content_hash = fingerprint("SELECT 2");
        compute_upstream_hashes(&mut models);
        assert_ne!(models[1].upstream_hash, before);
    }
}
