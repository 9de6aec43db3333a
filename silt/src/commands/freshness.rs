// silt/src/commands/freshness.rs

use comfy_table::Table;
use std::path::PathBuf;

use silt_core::application::check_freshness;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(project_dir: PathBuf, max_age_hours: Option<f64>) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;
    let max_age = max_age_hours.unwrap_or(config.freshness.max_age_hours);

    let statuses = check_freshness(&warehouse, max_age)?;
    if statuses.is_empty() {
        println!("No models have run yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(["model", "hours since run", "status"]);
    let mut stale = 0;
    for status in &statuses {
        if status.is_stale {
            stale += 1;
        }
        table.add_row([
            status.model.clone(),
            format!("{:.1}", status.hours_since_run),
            if status.is_stale { "STALE" } else { "fresh" }.to_string(),
        ]);
    }
    println!("{table}");

    if stale > 0 {
        eprintln!("\n⚠️  {stale} model(s) older than {max_age:.1}h.");
        std::process::exit(1);
    }
    Ok(())
}
