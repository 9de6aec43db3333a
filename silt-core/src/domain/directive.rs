// silt-core/src/domain/directive.rs
//
// Inline directive parsing for SQL model files. Directives are
// prefix-anchored single-line comments at any position in the file:
//
//   -- config: materialized=incremental, schema=silver, unique_key=id
//   -- depends_on: bronze.orders, bronze.customers
//   -- assert: row_count > 0
//   -- description: Daily order rollup
//   -- column order_id: Primary key from the source system
//
// Everything else is the executable query.

use crate::domain::model::{is_identifier, IncrementalStrategy, Materialization};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const CONFIG_PREFIX: &str = "-- config:";
const DEPENDS_PREFIX: &str = "-- depends_on:";
const ASSERT_PREFIX: &str = "-- assert:";
const DESCRIPTION_PREFIX: &str = "-- description:";
const COLUMN_PREFIX: &str = "-- column ";

/// A directive problem, tied to its 1-based source line.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DirectiveIssue {
    pub line: usize,
    pub message: String,
}

impl DirectiveIssue {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// The parsed directive surface of one model file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    pub materialized: Option<Materialization>,
    pub schema: Option<String>,
    pub unique_key: Option<String>,
    pub incremental_strategy: Option<IncrementalStrategy>,
    pub partition_by: Option<String>,
    pub incremental_filter: Option<String>,
    pub depends_on: Vec<String>,
    pub assertions: Vec<String>,
    pub description: String,
    pub column_docs: BTreeMap<String, String>,
}

impl Directives {
    /// Renders the directives back into a comment header. Inverse of
    /// [`parse_source`] for accepted values.
    pub fn to_header(&self) -> String {
        let mut out = String::new();
        let mut pairs: Vec<String> = Vec::new();
        if let Some(m) = &self.materialized {
            pairs.push(format!("materialized={}", m.as_str()));
        }
        if let Some(s) = &self.schema {
            pairs.push(format!("schema={s}"));
        }
        if let Some(k) = &self.unique_key {
            pairs.push(format!("unique_key={k}"));
        }
        if let Some(s) = &self.incremental_strategy {
            pairs.push(format!("incremental_strategy={}", s.as_str()));
        }
        if let Some(p) = &self.partition_by {
            pairs.push(format!("partition_by={p}"));
        }
        if let Some(f) = &self.incremental_filter {
            pairs.push(format!("incremental_filter={f}"));
        }
        if !pairs.is_empty() {
            let _ = writeln!(out, "{CONFIG_PREFIX} {}", pairs.join(", "));
        }
        if !self.depends_on.is_empty() {
            let _ = writeln!(out, "{DEPENDS_PREFIX} {}", self.depends_on.join(", "));
        }
        for assertion in &self.assertions {
            let _ = writeln!(out, "{ASSERT_PREFIX} {assertion}");
        }
        if !self.description.is_empty() {
            let _ = writeln!(out, "{DESCRIPTION_PREFIX} {}", self.description);
        }
        for (col, doc) in &self.column_docs {
            let _ = writeln!(out, "{COLUMN_PREFIX}{col}: {doc}");
        }
        out
    }
}

/// Result of splitting a model file into directives and executable query.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub directives: Directives,
    /// File content with directive lines removed and leading blanks trimmed.
    pub query: String,
    pub issues: Vec<DirectiveIssue>,
}

fn is_directive_line(trimmed: &str) -> bool {
    trimmed.starts_with(CONFIG_PREFIX)
        || trimmed.starts_with(DEPENDS_PREFIX)
        || trimmed.starts_with(ASSERT_PREFIX)
        || trimmed.starts_with(DESCRIPTION_PREFIX)
        || trimmed.starts_with(COLUMN_PREFIX)
}

/// Parse the directive header and strip it from the query text.
///
/// Unknown `config:` keys and malformed values are reported as issues, not
/// errors: the file is still discovered so the validator can point at it.
pub fn parse_source(sql: &str) -> ParsedSource {
    let mut directives = Directives::default();
    let mut issues = Vec::new();
    let mut query_lines: Vec<&str> = Vec::new();

    for (idx, raw_line) in sql.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if !is_directive_line(trimmed) {
            query_lines.push(raw_line);
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix(CONFIG_PREFIX) {
            parse_config_pairs(rest, line_no, &mut directives, &mut issues);
        } else if let Some(rest) = trimmed.strip_prefix(DEPENDS_PREFIX) {
            for dep in rest.split(',') {
                let dep = dep.trim();
                if dep.is_empty() {
                    continue;
                }
                if dep.split('.').all(is_identifier) {
                    directives.depends_on.push(dep.to_string());
                } else {
                    issues.push(DirectiveIssue::new(
                        line_no,
                        format!("invalid dependency reference '{dep}'"),
                    ));
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix(ASSERT_PREFIX) {
            let expr = rest.trim();
            if expr.is_empty() {
                issues.push(DirectiveIssue::new(line_no, "empty assert directive"));
            } else {
                directives.assertions.push(expr.to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix(DESCRIPTION_PREFIX) {
            directives.description = rest.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix(COLUMN_PREFIX) {
            match rest.split_once(':') {
                Some((col, doc)) => {
                    let col = col.trim();
                    if is_identifier(col) {
                        directives
                            .column_docs
                            .insert(col.to_string(), doc.trim().to_string());
                    } else {
                        issues.push(DirectiveIssue::new(
                            line_no,
                            format!("invalid column identifier '{col}' in column doc"),
                        ));
                    }
                }
                None => {
                    issues.push(DirectiveIssue::new(
                        line_no,
                        "column directive is missing ':'",
                    ));
                }
            }
        }
    }

    // Strip leading blank lines left behind by the header.
    let first_content = query_lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(query_lines.len());
    let query = query_lines[first_content..].join("\n");

    ParsedSource {
        directives,
        query,
        issues,
    }
}

fn parse_config_pairs(
    rest: &str,
    line_no: usize,
    directives: &mut Directives,
    issues: &mut Vec<DirectiveIssue>,
) {
    for pair in rest.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            issues.push(DirectiveIssue::new(
                line_no,
                format!("config entry '{pair}' is not key=value"),
            ));
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "materialized" => match value {
                "view" => directives.materialized = Some(Materialization::View),
                "table" => directives.materialized = Some(Materialization::Table),
                "incremental" => directives.materialized = Some(Materialization::Incremental),
                other => issues.push(DirectiveIssue::new(
                    line_no,
                    format!("unknown materialization '{other}'"),
                )),
            },
            "schema" => {
                if is_identifier(value) {
                    directives.schema = Some(value.to_string());
                } else {
                    issues.push(DirectiveIssue::new(
                        line_no,
                        format!("invalid schema identifier '{value}'"),
                    ));
                }
            }
            "unique_key" => {
                if is_identifier(value) {
                    directives.unique_key = Some(value.to_string());
                } else {
                    issues.push(DirectiveIssue::new(
                        line_no,
                        format!("invalid unique_key identifier '{value}'"),
                    ));
                }
            }
            "incremental_strategy" => match IncrementalStrategy::parse(value) {
                Some(s) => directives.incremental_strategy = Some(s),
                None => issues.push(DirectiveIssue::new(
                    line_no,
                    format!("unknown incremental_strategy '{value}'"),
                )),
            },
            "partition_by" => {
                if is_identifier(value) {
                    directives.partition_by = Some(value.to_string());
                } else {
                    issues.push(DirectiveIssue::new(
                        line_no,
                        format!("invalid partition_by identifier '{value}'"),
                    ));
                }
            }
            "incremental_filter" => {
                directives.incremental_filter = Some(value.to_string());
            }
            other => {
                issues.push(DirectiveIssue::new(
                    line_no,
                    format!("unknown config key '{other}'"),
                ));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_config() {
        let src = "-- config: materialized=table, schema=bronze\n\
                   -- depends_on: landing.users\n\n\
                   SELECT id FROM landing.users\n";
        let parsed = parse_source(src);
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.directives.materialized, Some(Materialization::Table));
        assert_eq!(parsed.directives.schema.as_deref(), Some("bronze"));
        assert_eq!(parsed.directives.depends_on, vec!["landing.users"]);
        assert_eq!(parsed.query, "SELECT id FROM landing.users");
    }

    #[test]
    fn test_parse_incremental_config() {
        let src = "-- config: materialized=incremental, schema=silver, unique_key=id, \
                   incremental_strategy=append, partition_by=event_date\n\
                   SELECT 1";
        let parsed = parse_source(src);
        assert!(parsed.issues.is_empty());
        assert_eq!(
            parsed.directives.materialized,
            Some(Materialization::Incremental)
        );
        assert_eq!(parsed.directives.unique_key.as_deref(), Some("id"));
        assert_eq!(
            parsed.directives.incremental_strategy,
            Some(IncrementalStrategy::Append)
        );
        assert_eq!(parsed.directives.partition_by.as_deref(), Some("event_date"));
    }

    #[test]
    fn test_parse_incremental_filter_keeps_braces() {
        let src = "-- config: materialized=incremental, unique_key=id, \
                   incremental_filter=WHERE updated_at > (SELECT MAX(updated_at) FROM {this})\n\
                   SELECT 1";
        let parsed = parse_source(src);
        assert!(parsed.issues.is_empty());
        assert_eq!(
            parsed.directives.incremental_filter.as_deref(),
            Some("WHERE updated_at > (SELECT MAX(updated_at) FROM {this})")
        );
    }

    #[test]
    fn test_assertions_accumulate_in_order() {
        let src = "-- assert: row_count > 0\n\
                   -- assert: no_nulls(email)\n\
                   -- assert: unique(customer_id)\n\
                   SELECT 1";
        let parsed = parse_source(src);
        assert_eq!(
            parsed.directives.assertions,
            vec!["row_count > 0", "no_nulls(email)", "unique(customer_id)"]
        );
    }

    #[test]
    fn test_description_and_column_docs() {
        let src = "-- description: Cleaned customer dimension\n\
                   -- column customer_id: Source primary key\n\
                   -- column email: Lowercased contact email\n\
                   SELECT 1";
        let parsed = parse_source(src);
        assert_eq!(parsed.directives.description, "Cleaned customer dimension");
        assert_eq!(
            parsed.directives.column_docs.get("email").map(String::as_str),
            Some("Lowercased contact email")
        );
    }

    #[test]
    fn test_unknown_key_is_reported_with_line() {
        let src = "-- config: materialized=view\n-- config: sharding=16\nSELECT 1";
        let parsed = parse_source(src);
        assert_eq!(parsed.issues.len(), 1);
        assert_eq!(parsed.issues[0].line, 2);
        assert!(parsed.issues[0].message.contains("sharding"));
    }

    #[test]
    fn test_bad_identifier_is_reported() {
        let src = "-- config: materialized=incremental, unique_key=id;drop\nSELECT 1";
        let parsed = parse_source(src);
        assert_eq!(parsed.issues.len(), 1);
        assert!(parsed.issues[0].message.contains("unique_key"));
    }

    #[test]
    fn test_query_strips_directives_and_leading_blanks() {
        let src = "-- config: materialized=view\n\n\n  \nSELECT 1 AS id\nFROM t\n";
        let parsed = parse_source(src);
        assert_eq!(parsed.query, "SELECT 1 AS id\nFROM t");
    }

    #[test]
    fn test_round_trip_through_header() {
        let mut directives = Directives {
            materialized: Some(Materialization::Incremental),
            schema: Some("silver".into()),
            unique_key: Some("id".into()),
            incremental_strategy: Some(IncrementalStrategy::Merge),
            partition_by: Some("event_date".into()),
            incremental_filter: Some("WHERE updated_at > now() - INTERVAL 1 DAY".into()),
            depends_on: vec!["bronze.events".into(), "bronze.users".into()],
            assertions: vec!["row_count > 0".into(), "unique(id)".into()],
            description: "Session rollup".into(),
            column_docs: BTreeMap::new(),
        };
        directives
            .column_docs
            .insert("id".into(), "event key".into());

        let header = directives.to_header();
        let parsed = parse_source(&format!("{header}SELECT 1"));
        assert!(parsed.issues.is_empty());
        assert_eq!(parsed.directives, directives);
    }
}
