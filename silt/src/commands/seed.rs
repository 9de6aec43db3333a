// silt/src/commands/seed.rs

use std::path::PathBuf;

use silt_core::application::run_seeds;
use silt_core::application::seed::SeedStatus;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(
    project_dir: PathBuf,
    targets: Vec<String>,
    force: bool,
) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    let targets = if targets.is_empty() { None } else { Some(targets) };
    let results = run_seeds(
        &warehouse,
        &project_dir.join("seeds"),
        targets.as_deref(),
        force,
    )
    .await?;

    let mut failed = false;
    for (name, status) in &results {
        match status {
            SeedStatus::Loaded => println!("  ✅ {name} loaded"),
            SeedStatus::Skipped => println!("  ⏭️  {name} unchanged"),
            SeedStatus::Error(e) => {
                failed = true;
                println!("  ❌ {name}: {e}");
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
