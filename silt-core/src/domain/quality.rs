// silt-core/src/domain/quality.rs
//
// The assertion expression grammar shared by inline `-- assert:` directives
// and standalone contracts. Anything that is not a recognized built-in is
// treated as an arbitrary boolean SQL predicate over the model's rows.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn re_row_count() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^row_count\s*(>=|<=|!=|>|<|=)\s*(\d+)$")
            .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
    })
}

fn re_column_check() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(no_nulls|unique)\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)$")
            .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
    })
}

fn re_accepted_values() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^accepted_values\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*\[(.*)\]\s*\)$")
            .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    pub fn eval(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// One parsed assertion.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionExpr {
    RowCount { op: CompareOp, value: i64 },
    NoNulls { column: String },
    Unique { column: String },
    /// `literals` is the raw comma-separated SQL literal list, kept verbatim
    /// for the generated `IN (...)` clause.
    AcceptedValues { column: String, literals: String },
    /// Anything else: a boolean predicate evaluated row-wise.
    Predicate(String),
}

impl AssertionExpr {
    pub fn parse(expr: &str) -> AssertionExpr {
        let expr = expr.trim();

        if let Some(caps) = re_row_count().captures(expr) {
            let op = CompareOp::parse(&caps[1]);
            let value = caps[2].parse::<i64>().ok();
            if let (Some(op), Some(value)) = (op, value) {
                return AssertionExpr::RowCount { op, value };
            }
        }

        if let Some(caps) = re_column_check().captures(expr) {
            let column = caps[2].to_string();
            return match &caps[1] {
                "no_nulls" => AssertionExpr::NoNulls { column },
                _ => AssertionExpr::Unique { column },
            };
        }

        if let Some(caps) = re_accepted_values().captures(expr) {
            return AssertionExpr::AcceptedValues {
                column: caps[1].to_string(),
                literals: caps[2].trim().to_string(),
            };
        }

        AssertionExpr::Predicate(expr.to_string())
    }

    /// The SQL producing the witness counter for this assertion against
    /// `table`. Interpretation of the counter lives with the evaluator.
    pub fn check_sql(&self, table: &str) -> String {
        match self {
            AssertionExpr::RowCount { .. } => format!("SELECT count(*) FROM {table}"),
            AssertionExpr::NoNulls { column } => {
                format!("SELECT count(*) FROM {table} WHERE {column} IS NULL")
            }
            AssertionExpr::Unique { column } => format!(
                "SELECT count(*) FROM (SELECT {column} FROM {table} \
                 GROUP BY {column} HAVING count(*) > 1)"
            ),
            AssertionExpr::AcceptedValues { column, literals } => format!(
                "SELECT count(*) FROM {table} \
                 WHERE {column} IS NOT NULL AND {column} NOT IN ({literals})"
            ),
            AssertionExpr::Predicate(predicate) => format!(
                "SELECT count(*) FROM {table} \
                 WHERE NOT ({predicate}) OR ({predicate}) IS NULL"
            ),
        }
    }

    /// Whether the witness counter means the assertion passed, plus the
    /// detail string recorded to `assertion_results`.
    pub fn interpret(&self, counter: i64) -> (bool, String) {
        match self {
            AssertionExpr::RowCount { op, value } => {
                (op.eval(counter, *value), format!("row_count={counter}"))
            }
            AssertionExpr::NoNulls { .. } => (counter == 0, format!("null_count={counter}")),
            AssertionExpr::Unique { .. } => (counter == 0, format!("duplicate_count={counter}")),
            AssertionExpr::AcceptedValues { .. } => {
                (counter == 0, format!("unexpected_count={counter}"))
            }
            AssertionExpr::Predicate(_) => (counter == 0, format!("violation_count={counter}")),
        }
    }
}
