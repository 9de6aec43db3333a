// silt/src/commands/schedule.rs

use std::path::PathBuf;

use silt_core::application::scheduler::scheduled_streams;
use silt_core::application::{CancelToken, Scheduler};

use crate::commands::{load_config, open_warehouse};

pub async fn execute(project_dir: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    let streams = scheduled_streams(&config);
    if streams.is_empty() {
        println!("No scheduled streams in project.yml; nothing to do.");
        return Ok(());
    }
    println!("⏰ Scheduler watching {} stream(s):", streams.len());
    for (name, cron) in &streams {
        println!("   {name}: {cron}");
    }

    let scheduler = Scheduler::new(project_dir, warehouse);
    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down scheduler...");
            ctrl_c_cancel.cancel();
        }
    });

    scheduler.run(cancel).await;
    Ok(())
}
