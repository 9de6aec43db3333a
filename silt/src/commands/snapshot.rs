// silt/src/commands/snapshot.rs

use clap::Subcommand;
use std::path::PathBuf;

use silt_core::application::snapshot::{create_snapshot, diff_against_snapshot};
use silt_core::infrastructure::meta::MetaStore;

use crate::commands::{load_config, open_warehouse};

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Capture the current project + data state
    Create {
        /// Snapshot name (default: timestamped)
        name: Option<String>,
    },
    /// List stored snapshots
    List,
    /// Show drift against a stored snapshot
    Diff { name: String },
}

pub async fn execute(project_dir: PathBuf, command: SnapshotCommands) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    match command {
        SnapshotCommands::Create { name } => {
            let info = create_snapshot(&warehouse, &project_dir, name)?;
            println!(
                "📸 Snapshot '{}' created ({} files, {} tables, project {})",
                info.name, info.file_count, info.table_count, info.project_hash
            );
        }
        SnapshotCommands::List => {
            let meta = MetaStore::new(warehouse.clone());
            meta.ensure_meta_tables()?;
            let snapshots = meta.list_snapshots()?;
            if snapshots.is_empty() {
                println!("No snapshots yet.");
            }
            for (name, created_at) in snapshots {
                println!("  {name}  ({created_at})");
            }
        }
        SnapshotCommands::Diff { name } => match diff_against_snapshot(
            &warehouse,
            &project_dir,
            &name,
        )? {
            None => {
                eprintln!("❌ Snapshot '{name}' not found.");
                std::process::exit(1);
            }
            Some(diff) if diff.is_clean() => println!("✨ No drift against '{name}'."),
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
        },
    }
    Ok(())
}
