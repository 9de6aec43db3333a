// silt/src/commands/stream.rs

use std::path::PathBuf;

use silt_core::application::run_stream;
use silt_core::application::stream::StreamStatus;
use silt_core::application::CancelToken;

use crate::commands::{load_config, open_warehouse};

pub async fn execute(project_dir: PathBuf, name: String, force: bool) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    println!("🚀 Running stream '{name}'...");
    let report = run_stream(
        &warehouse,
        &project_dir,
        &config,
        &name,
        force,
        CancelToken::new(),
    )
    .await?;

    for step in &report.steps {
        match &step.error {
            None => println!("  ✅ {} ({} attempt(s))", step.action, step.attempts),
            Some(e) => println!("  ❌ {} after {} attempt(s): {e}", step.action, step.attempts),
        }
    }

    match report.status {
        StreamStatus::Success => {
            println!("\n✨ Stream '{name}' finished in {:.2}s", report.duration_seconds);
            Ok(())
        }
        StreamStatus::Failed => {
            eprintln!("\n❌ Stream '{name}' failed after {:.2}s", report.duration_seconds);
            std::process::exit(1);
        }
    }
}
