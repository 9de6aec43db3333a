// silt/src/main.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "silt")]
#[command(about = "Self-hosted SQL transform engine on DuckDB", long_about = None)]
#[command(version)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(long, short = 'p', global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the transform pipeline (change-detected, tiered, parallel)
    Run {
        /// Specific models to build (name or schema.name); default: all
        targets: Vec<String>,

        /// Rebuild even when nothing changed
        #[arg(long, short)]
        force: bool,

        /// Tier worker cap (default: logical CPU count)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Run a named stream (seed/ingest/transform/export steps)
    Stream {
        name: String,

        #[arg(long, short)]
        force: bool,
    },

    /// Load CSV seeds into the warehouse
    Seed {
        targets: Vec<String>,

        #[arg(long, short)]
        force: bool,
    },

    /// Execute an ad-hoc SQL query
    Query {
        sql: String,

        /// Allow write statements
        #[arg(long)]
        write: bool,

        /// Row cap for the result set
        #[arg(long, default_value = "1000")]
        limit: usize,

        /// Statement timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Compile-check every model without materializing anything
    Validate,

    /// Evaluate standalone data contracts
    Contracts {
        /// Contract or model names to evaluate; default: all
        targets: Vec<String>,
    },

    /// Report model freshness against a maximum age
    Freshness {
        #[arg(long)]
        max_age_hours: Option<f64>,
    },

    /// Show downstream impact (and column lineage) of a model
    Lineage {
        model: String,

        /// Trace a specific column through descendants
        #[arg(long, short)]
        column: Option<String>,
    },

    /// Show what would change if transforms ran now
    Diff {
        targets: Vec<String>,

        /// Diff all models in one schema
        #[arg(long, short)]
        target: Option<String>,

        /// Show all changed rows, not just samples
        #[arg(long)]
        full: bool,

        /// Compare project + data state against a named snapshot instead
        #[arg(long)]
        snapshot: Option<String>,
    },

    /// Manage project + data snapshots
    Snapshot {
        #[command(subcommand)]
        command: commands::snapshot::SnapshotCommands,
    },

    /// Run the cron scheduler in the foreground
    Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug silt run ... for engine internals
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let project_dir = cli.project_dir;

    match cli.command {
        Commands::Run {
            targets,
            force,
            workers,
        } => commands::run::execute(project_dir, targets, force, workers).await,
        Commands::Stream { name, force } => {
            commands::stream::execute(project_dir, name, force).await
        }
        Commands::Seed { targets, force } => {
            commands::seed::execute(project_dir, targets, force).await
        }
        Commands::Query {
            sql,
            write,
            limit,
            timeout,
        } => commands::query::execute(project_dir, sql, write, limit, timeout).await,
        Commands::Validate => commands::validate::execute(project_dir).await,
        Commands::Contracts { targets } => {
            commands::contracts::execute(project_dir, targets).await
        }
        Commands::Freshness { max_age_hours } => {
            commands::freshness::execute(project_dir, max_age_hours).await
        }
        Commands::Lineage { model, column } => {
            commands::lineage::execute(project_dir, model, column).await
        }
        Commands::Diff {
            targets,
            target,
            full,
            snapshot,
        } => commands::diff::execute(project_dir, targets, target, full, snapshot).await,
        Commands::Snapshot { command } => commands::snapshot::execute(project_dir, command).await,
        Commands::Schedule => commands::schedule::execute(project_dir).await,
    }
}
