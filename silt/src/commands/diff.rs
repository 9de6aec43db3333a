// silt/src/commands/diff.rs

use comfy_table::Table;
use std::path::PathBuf;

use silt_core::application::diff_models;
use silt_core::application::snapshot::diff_against_snapshot;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(
    project_dir: PathBuf,
    targets: Vec<String>,
    target_schema: Option<String>,
    full: bool,
    snapshot: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    // Snapshot comparison mode
    if let Some(name) = snapshot {
        match diff_against_snapshot(&warehouse, &project_dir, &name)? {
            None => {
                eprintln!("❌ Snapshot '{name}' not found.");
                std::process::exit(1);
            }
            Some(diff) if diff.is_clean() => {
                println!("✨ No drift against snapshot '{name}'.");
            }
            Some(diff) => {
                for f in &diff.files_added {
                    println!("  + {f}");
                }
                for f in &diff.files_removed {
                    println!("  - {f}");
                }
                for f in &diff.files_changed {
                    println!("  ~ {f}");
                }
                for t in &diff.tables_changed {
                    println!("  ~ table {t}");
                }
            }
        }
        return Ok(());
    }

    let targets = if targets.is_empty() { None } else { Some(targets) };
    let reports = diff_models(
        &warehouse,
        &project_dir.join("transform"),
        targets.as_deref(),
        target_schema.as_deref(),
        full,
    )
    .await?;

    if reports.is_empty() {
        println!("No models found to diff.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(["model", "added", "removed", "modified", "rows before", "rows after"]);
    for report in &reports {
        if let Some(e) = &report.error {
            println!("  ❌ {}: {e}", report.model);
            continue;
        }
        let label = if report.is_new {
            format!("{} (new)", report.model)
        } else {
            report.model.clone()
        };
        table.add_row([
            label,
            report.added.to_string(),
            report.removed.to_string(),
            report.modified.to_string(),
            report.total_before.to_string(),
            report.total_after.to_string(),
        ]);
    }
    println!("{table}");

    for report in reports.iter().filter(|r| !r.schema_changes.is_empty()) {
        println!("\nschema changes for {}:", report.model);
        for change in &report.schema_changes {
            println!("  {} {} ({})", change.change_type, change.column, change.detail);
        }
    }

    Ok(())
}
