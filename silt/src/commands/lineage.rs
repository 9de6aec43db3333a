// silt/src/commands/lineage.rs

use std::path::PathBuf;

use silt_core::application::lineage::{extract_column_lineage, impact_analysis};
use silt_core::infrastructure::discovery::ModelDiscovery;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(
    project_dir: PathBuf,
    model: String,
    column: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;
    let models = ModelDiscovery::discover(&project_dir.join("transform"))?;

    let report = impact_analysis(&models, &model, column.as_deref(), Some(&warehouse))?;

    if let Some(target) = models.iter().find(|m| m.full_name == model) {
        println!("📊 Column lineage of {model}:");
        let lineage = extract_column_lineage(&target.query, Some(&warehouse));
        if lineage.is_empty() {
            println!("   (no lineage: unparseable query or unresolved SELECT *)");
        }
        for (out_col, refs) in &lineage {
            let sources: Vec<String> = refs
                .iter()
                .map(|r| format!("{}.{}", r.source_table, r.source_column))
                .collect();
            println!("   {out_col} <- [{}]", sources.join(", "));
        }
        println!();
    }

    println!("⬇️  Downstream of {model}:");
    if report.downstream_models.is_empty() {
        println!("   (none)");
    }
    for downstream in &report.downstream_models {
        println!("   {downstream}");
    }

    if column.is_some() {
        println!("\n🎯 Columns affected by {model}.{}:", report.column.as_deref().unwrap_or(""));
        if report.affected_columns.is_empty() {
            println!("   (none)");
        }
        for affected in &report.affected_columns {
            println!("   {}.{}", affected.model, affected.column);
        }
    }

    Ok(())
}
