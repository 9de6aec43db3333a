// silt-core/src/domain/model.rs

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

fn re_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| {
            // The pattern is hardcoded; this branch exists only to satisfy
            // the no-unwrap lint.
            Regex::new("$^").unwrap_or_else(|_| unreachable!())
        })
    })
}

fn re_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+")
            .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
    })
}

/// True when `value` is a valid SQL identifier for schemas, model names,
/// unique keys and partition columns.
pub fn is_identifier(value: &str) -> bool {
    re_identifier().is_match(value)
}

/// 16-hex-character prefix of a SHA-256 over `content` with all whitespace
/// runs collapsed, so that reformatting a query never triggers a rebuild.
pub fn fingerprint(content: &str) -> String {
    let normalized = re_whitespace().replace_all(content.trim(), " ");
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// How a model is realized in the warehouse. A closed set of variants:
/// connector-style open inheritance is deliberately absent.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    View,
    Table,
    Incremental,
}

impl Materialization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Materialization::View => "view",
            Materialization::Table => "table",
            Materialization::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    Merge,
    DeleteInsert,
    Append,
}

impl IncrementalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncrementalStrategy::Merge => "merge",
            IncrementalStrategy::DeleteInsert => "delete+insert",
            IncrementalStrategy::Append => "append",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "merge" => Some(IncrementalStrategy::Merge),
            "delete+insert" => Some(IncrementalStrategy::DeleteInsert),
            "append" => Some(IncrementalStrategy::Append),
            _ => None,
        }
    }
}

/// A single SQL transformation model, parsed from `transform/<schema>/<name>.sql`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SqlModel {
    pub path: PathBuf,
    pub name: String,
    pub schema: String,
    /// `schema.name`, unique across the project.
    pub full_name: String,
    /// Raw file content.
    pub sql: String,
    /// Executable query: directives stripped, leading blank lines trimmed.
    pub query: String,
    pub materialized: Materialization,
    /// Required for `merge` and `delete+insert`.
    pub unique_key: Option<String>,
    /// None means: merge when unique_key is set, append otherwise.
    pub incremental_strategy: Option<IncrementalStrategy>,
    pub partition_by: Option<String>,
    /// Trusted author-supplied `WHERE ..` fragment, may contain `{this}`.
    pub incremental_filter: Option<String>,
    pub depends_on: Vec<String>,
    pub assertions: Vec<String>,
    pub description: String,
    pub column_docs: BTreeMap<String, String>,
    pub content_hash: String,
    /// Combined fingerprint of known upstream models, filled by the planner.
    pub upstream_hash: String,
    /// Directive problems found at discovery; surfaced by the validator and
    /// by `run_transform` before any DDL is issued.
    pub directive_errors: Vec<crate::domain::directive::DirectiveIssue>,
}

impl SqlModel {
    /// Effective incremental strategy once defaults are applied.
    pub fn strategy(&self) -> IncrementalStrategy {
        match self.incremental_strategy {
            Some(s) => s,
            None if self.unique_key.is_some() => IncrementalStrategy::Merge,
            None => IncrementalStrategy::Append,
        }
    }

    /// The model query with `{this}` resolved to the target relation.
    pub fn rendered_query(&self) -> String {
        self.query.replace("{this}", &self.full_name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_grammar() {
        assert!(is_identifier("orders"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("events_v2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("bad-name"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("drop table"));
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let a = fingerprint("SELECT  id,\n  name FROM t");
        let b = fingerprint("SELECT id, name FROM t");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 2"));
    }

    #[test]
    fn test_default_strategy() {
        let mut model = SqlModel {
            path: PathBuf::from("m.sql"),
            name: "m".into(),
            schema: "silver".into(),
            full_name: "silver.m".into(),
            sql: String::new(),
            query: "SELECT 1".into(),
            materialized: Materialization::Incremental,
            unique_key: None,
            incremental_strategy: None,
            partition_by: None,
            incremental_filter: None,
            depends_on: vec![],
            assertions: vec![],
            description: String::new(),
            column_docs: BTreeMap::new(),
            content_hash: String::new(),
            upstream_hash: String::new(),
            directive_errors: vec![],
        };
        assert_eq!(model.strategy(), IncrementalStrategy::Append);

        model.unique_key = Some("id".into());
        assert_eq!(model.strategy(), IncrementalStrategy::Merge);

        // Explicit strategy always wins, even with a unique_key present.
        model.incremental_strategy = Some(IncrementalStrategy::Append);
        assert_eq!(model.strategy(), IncrementalStrategy::Append);
    }

    #[test]
    fn test_rendered_query_resolves_this() {
        let model = SqlModel {
            path: PathBuf::from("m.sql"),
            name: "m".into(),
            schema: "silver".into(),
            full_name: "silver.m".into(),
            sql: String::new(),
            query: "SELECT * FROM src WHERE id NOT IN (SELECT id FROM {this})".into(),
            materialized: Materialization::Incremental,
            unique_key: None,
            incremental_strategy: None,
            partition_by: None,
            incremental_filter: None,
            depends_on: vec![],
            assertions: vec![],
            description: String::new(),
            column_docs: BTreeMap::new(),
            content_hash: String::new(),
            upstream_hash: String::new(),
            directive_errors: vec![],
        };
        assert!(model.rendered_query().contains("SELECT id FROM silver.m"));
    }
}
