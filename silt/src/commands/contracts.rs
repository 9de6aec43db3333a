// silt/src/commands/contracts.rs

use std::path::PathBuf;

use silt_core::application::run_contracts;
use silt_core::domain::contract::Severity;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(project_dir: PathBuf, targets: Vec<String>) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    let targets = if targets.is_empty() { None } else { Some(targets) };
    let outcomes = run_contracts(
        &warehouse,
        &project_dir.join("contracts"),
        targets.as_deref(),
    )
    .await?;

    if outcomes.is_empty() {
        println!("No contracts found.");
        return Ok(());
    }

    let mut blocking_failures = 0;
    for outcome in &outcomes {
        let marker = if outcome.passed { "✅" } else { "❌" };
        println!(
            "  {marker} {} ({}) [{}]",
            outcome.contract_name,
            outcome.model,
            outcome.severity.as_str()
        );
        for result in &outcome.results {
            if !result.passed {
                println!("       ✗ {}: {}", result.expression, result.detail);
            }
        }
        if let Some(e) = &outcome.error {
            println!("       ✗ {e}");
        }
        if !outcome.passed && outcome.severity == Severity::Error {
            blocking_failures += 1;
        }
    }

    if blocking_failures > 0 {
        eprintln!("\n❌ {blocking_failures} contract(s) failed with severity=error.");
        std::process::exit(1);
    }
    println!("\n✨ Contracts evaluated.");
    Ok(())
}
