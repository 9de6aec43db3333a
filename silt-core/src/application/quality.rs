// silt-core/src/application/quality.rs
//
// Runs inline assertions and standalone contracts against materialized
// relations, and persists every outcome.

use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::domain::contract::{Contract, Severity};
use crate::domain::quality::AssertionExpr;
use crate::error::SiltError;
use crate::infrastructure::discovery::discover_contracts;
use crate::infrastructure::meta::{MetaStore, RunRecord};
use crate::infrastructure::warehouse::Warehouse;
use crate::ports::executor::Executor;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssertionOutcome {
    pub expression: String,
    pub passed: bool,
    pub detail: String,
}

/// Evaluates one expression against `table`. Database errors are not
/// propagated: a broken assertion is a failed assertion.
pub async fn evaluate_assertion(
    executor: &dyn Executor,
    table: &str,
    expression: &str,
) -> AssertionOutcome {
    let expr = AssertionExpr::parse(expression);
    match executor.query_scalar(&expr.check_sql(table)).await {
        Ok(counter) => {
            let (passed, detail) = expr.interpret(counter);
            AssertionOutcome {
                expression: expression.to_string(),
                passed,
                detail,
            }
        }
        Err(e) => AssertionOutcome {
            expression: expression.to_string(),
            passed: false,
            detail: format!("Assertion error: {e}"),
        },
    }
}

/// Runs every inline assertion of a model, in declaration order.
pub async fn run_assertions(
    executor: &dyn Executor,
    table: &str,
    assertions: &[String],
) -> Vec<AssertionOutcome> {
    let mut outcomes = Vec::with_capacity(assertions.len());
    for expression in assertions {
        outcomes.push(evaluate_assertion(executor, table, expression).await);
    }
    outcomes
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ContractOutcome {
    pub contract_name: String,
    pub model: String,
    pub passed: bool,
    pub severity: Severity,
    pub results: Vec<AssertionOutcome>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Evaluates one contract. A missing or invalid target never aborts the
/// contract run; it fails that contract.
pub async fn evaluate_contract(warehouse: &Warehouse, contract: &Contract) -> ContractOutcome {
    let start = Instant::now();
    let failed = |error: String| ContractOutcome {
        contract_name: contract.name.clone(),
        model: contract.model.clone(),
        passed: false,
        severity: contract.severity,
        results: vec![],
        duration_ms: start.elapsed().as_millis() as i64,
        error: Some(error),
    };

    let (schema, name) = match contract.model_parts() {
        Ok(parts) => parts,
        Err(e) => return failed(e.to_string()),
    };

    match warehouse.table_exists(schema, name).await {
        Ok(true) => {}
        Ok(false) => return failed(format!("Table {} does not exist", contract.model)),
        Err(e) => return failed(e.to_string()),
    }

    let results = run_assertions(warehouse, &contract.model, &contract.assertions).await;
    let passed = results.iter().all(|r| r.passed);

    ContractOutcome {
        contract_name: contract.name.clone(),
        model: contract.model.clone(),
        passed,
        severity: contract.severity,
        results,
        duration_ms: start.elapsed().as_millis() as i64,
        error: None,
    }
}

/// Discovers and evaluates all contracts, persisting results to
/// `contract_results` and the run log. `targets` filters by contract or
/// model name.
pub async fn run_contracts(
    warehouse: &Warehouse,
    contracts_dir: &Path,
    targets: Option<&[String]>,
) -> Result<Vec<ContractOutcome>, SiltError> {
    let meta = MetaStore::new(warehouse.clone());
    meta.ensure_meta_tables()?;

    let mut contracts = discover_contracts(contracts_dir);
    if let Some(filter) = targets {
        if !filter.is_empty() && filter != ["all"] {
            contracts.retain(|c| {
                filter.iter().any(|t| t == &c.name || t == &c.model)
            });
        }
    }

    let mut outcomes = Vec::with_capacity(contracts.len());
    for contract in &contracts {
        let outcome = evaluate_contract(warehouse, contract).await;

        let detail = serde_json::json!({
            "results": outcome.results,
            "error": outcome.error,
        });
        meta.record_contract(
            &outcome.contract_name,
            &outcome.model,
            outcome.passed,
            outcome.severity.as_str(),
            &detail,
        )?;
        meta.log_run(&RunRecord {
            run_type: "contract".into(),
            target: outcome.contract_name.clone(),
            status: if outcome.passed { "success" } else { "failed" }.into(),
            duration_ms: outcome.duration_ms,
            error: outcome.error.clone(),
            ..Default::default()
        })?;

        if outcome.passed {
            info!("contract {} passed", outcome.contract_name);
        } else {
            warn!(
                "contract {} failed (severity {})",
                outcome.contract_name,
                outcome.severity.as_str()
            );
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
