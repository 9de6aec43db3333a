// silt/src/commands/query.rs

use comfy_table::Table;
use std::path::PathBuf;

use silt_core::application::query::{run_query, QueryOptions};

use crate::commands::{load_config, open_warehouse};

pub async fn execute(
    project_dir: PathBuf,
    sql: String,
    write: bool,
    limit: usize,
    timeout: u64,
) -> anyhow::Result<()> {
    let config = load_config(&project_dir)?;
    let warehouse = open_warehouse(&project_dir, &config)?;

    let options = QueryOptions {
        read_only: !write,
        timeout_s: timeout,
        limit,
    };

    match run_query(&warehouse, &sql, options).await {
        Ok(output) => {
            let mut table = Table::new();
            table.set_header(&output.columns);
            for row in &output.rows {
                table.add_row(row.iter().map(render_cell));
            }
            println!("{table}");
            if output.truncated {
                println!("(truncated to {limit} rows)");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Query failed [{}]: {e}", e.kind());
            std::process::exit(1);
        }
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
