// silt-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiltError {
    // --- DOMAIN ERRORS (directives, cycles, assertion grammar) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (DuckDB, IO, YAML) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- GENERIC / APPLICATION ERRORS ---
    #[error("Internal Error: {0}")]
    Internal(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Statement timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl SiltError {
    /// Stable string code surfaced to CLI/HTTP consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            SiltError::Domain(e) => e.kind(),
            SiltError::Infrastructure(_) => "execution_error",
            SiltError::Internal(_) => "execution_error",
            SiltError::Cancelled => "cancelled",
            SiltError::Timeout { .. } => "timeout",
        }
    }
}

// Manual implementation to avoid a duplicate enum variant but keep ergonomics
impl From<std::io::Error> for SiltError {
    fn from(err: std::io::Error) -> Self {
        SiltError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<duckdb::Error> for SiltError {
    fn from(err: duckdb::Error) -> Self {
        SiltError::Infrastructure(InfrastructureError::from(err))
    }
}
