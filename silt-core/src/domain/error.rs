// silt-core/src/domain/error.rs

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("Parse error in {path} (line {line}): {message}")]
    #[diagnostic(
        code(silt::domain::parse),
        help("Directive lines look like `-- config: key=value, key=value`.")
    )]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Circular dependency detected involving: {0}")]
    #[diagnostic(code(silt::domain::cycle), help("Check your depends_on directives."))]
    CircularDependency(String),

    #[error("Duplicate model name '{full_name}' ({first} and {second})")]
    #[diagnostic(code(silt::domain::duplicate_model))]
    DuplicateModel {
        full_name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Invalid identifier '{value}' for {context}")]
    #[diagnostic(
        code(silt::domain::identifier),
        help("Identifiers must match [A-Za-z_][A-Za-z0-9_]*.")
    )]
    InvalidIdentifier { value: String, context: String },

    #[error("Model '{0}' uses strategy '{1}' but declares no unique_key")]
    #[diagnostic(code(silt::domain::unique_key))]
    MissingUniqueKey(String, String),

    #[error("Model '{0}' not found")]
    #[diagnostic(code(silt::domain::model_not_found))]
    ModelNotFound(String),

    #[error("Assertion failed on {0}: {1}")]
    #[diagnostic(code(silt::domain::assertion))]
    AssertionFailed(String, String),

    #[error("Validation failed: {0}")]
    #[diagnostic(code(silt::domain::validation))]
    Validation(String),

    #[error("Invalid cron expression '{0}': {1}")]
    #[diagnostic(
        code(silt::domain::schedule),
        help("Cron expressions have 5 fields: minute hour dom month dow.")
    )]
    Schedule(String, String),

    #[error("Contract error: {0}")]
    #[diagnostic(code(silt::domain::contract))]
    Contract(String),
}

impl DomainError {
    /// Stable string code surfaced to CLI/HTTP consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Parse { .. }
            | DomainError::DuplicateModel { .. }
            | DomainError::InvalidIdentifier { .. }
            | DomainError::Schedule(..)
            | DomainError::Contract(_) => "parse_error",
            DomainError::CircularDependency(_) => "cycle",
            DomainError::MissingUniqueKey(..) => "incremental_requires_unique_key",
            DomainError::ModelNotFound(_) => "missing_upstream",
            DomainError::AssertionFailed(..) => "assertion_failed",
            DomainError::Validation(_) => "validation_error",
        }
    }
}
