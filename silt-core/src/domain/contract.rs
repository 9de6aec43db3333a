// silt-core/src/domain/contract.rs
//
// Standalone data contracts, discovered as YAML documents under contracts/:
//
//   contracts:
//     - name: orders_not_empty
//       description: "Orders table must have data"
//       model: gold.orders
//       severity: error
//       assertions:
//         - row_count > 0
//         - unique(order_id)

use crate::domain::error::DomainError;
use crate::domain::model::is_identifier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warn,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
        }
    }
}

/// One contract definition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Contract {
    pub name: String,
    /// Target model, `schema.name`.
    pub model: String,
    #[serde(default)]
    pub assertions: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// The shape of one contracts/*.yml file.
#[derive(Debug, Deserialize)]
pub struct ContractFile {
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl Contract {
    /// Splits `model` into (schema, name), enforcing the identifier grammar.
    pub fn model_parts(&self) -> Result<(&str, &str), DomainError> {
        match self.model.split_once('.') {
            Some((schema, name)) if is_identifier(schema) && is_identifier(name) => {
                Ok((schema, name))
            }
            _ => Err(DomainError::Contract(format!(
                "contract '{}' targets invalid model name '{}'",
                self.name, self.model
            ))),
        }
    }
}
