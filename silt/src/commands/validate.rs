// silt/src/commands/validate.rs

use std::path::PathBuf;

use silt_core::application::validate_models;
use silt_core::infrastructure::discovery::ModelDiscovery;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    let models = ModelDiscovery::discover(&project_dir.join("transform"))?;
    println!("🔎 Validating {} model(s)...", models.len());

    let issues = validate_models(Some(&warehouse), &models).await;
    if issues.is_empty() {
        println!("✨ All models are valid.");
        return Ok(());
    }

    for issue in &issues {
        let line = issue
            .line
            .map(|l| format!(" (line {l})"))
            .unwrap_or_default();
        println!(
            "  ✗ {} [{}{}]: {}",
            issue.model,
            issue.path.display(),
            line,
            issue.message
        );
    }
    eprintln!("\n❌ {} validation issue(s).", issues.len());
    std::process::exit(1);
}
