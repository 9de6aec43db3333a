// silt/src/commands/run.rs
//
// USE CASE: run the transform pipeline.

use std::path::PathBuf;

use silt_core::application::transform::ModelStatus;
use silt_core::application::{run_transform, validate_models, RunOptions};
use silt_core::infrastructure::config::ValidationMode;
use silt_core::infrastructure::discovery::ModelDiscovery;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(
    project_dir: PathBuf,
    targets: Vec<String>,
    force: bool,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let start = std::time::Instant::now();

    println!("⚙️  Loading configuration...");
    let config = load_config(&project_dir)?;
    println!("   Project: {}", config.name);

    let warehouse = open_warehouse(&project_dir, &config)?;
    let transform_dir = project_dir.join("transform");

    // Strict mode: validation findings block the run.
    if config.validation == ValidationMode::Strict {
        let models = ModelDiscovery::discover(&transform_dir)?;
        let issues = validate_models(Some(&warehouse), &models).await;
        if !issues.is_empty() {
            for issue in &issues {
                eprintln!("  ✗ {} ({}): {}", issue.model, issue.path.display(), issue.message);
            }
            eprintln!("\n❌ Validation failed with {} issue(s).", issues.len());
            std::process::exit(1);
        }
    }

    let options = RunOptions {
        targets: if targets.is_empty() { None } else { Some(targets) },
        force,
        workers: workers.or(config.workers),
        ..Default::default()
    };

    match run_transform(&warehouse, &transform_dir, options).await {
        Ok(report) => {
            for (name, status) in &report.results {
                let marker = match status {
                    ModelStatus::Built => "✅",
                    ModelStatus::Skipped => "⏭️ ",
                    ModelStatus::Error(_) => "❌",
                    ModelStatus::AssertionFailed => "🛑",
                    ModelStatus::Cancelled => "🚫",
                };
                match status {
                    ModelStatus::Error(e) => println!("  {marker} {name}: {e}"),
                    _ => println!("  {marker} {name} ({})", status.as_str()),
                }
            }
            if report.success() {
                println!(
                    "\n✨ SUCCESS! {} built in {:.2?}",
                    report.built(),
                    start.elapsed()
                );
            } else {
                eprintln!("\n❌ FAILURE. See statuses above.");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("\n💥 PIPELINE ERROR [{}]: {e}", e.kind());
            std::process::exit(1);
        }
    }

    Ok(())
}
