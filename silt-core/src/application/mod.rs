// silt-core/src/application/mod.rs

pub mod diff;
pub mod lineage;
pub mod materializer;
pub mod profiler;
pub mod quality;
pub mod query;
pub mod scheduler;
pub mod seed;
pub mod snapshot;
pub mod stream;
pub mod transform;
pub mod validator;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Lets the CLI import use cases without knowing the internal layout:
// `use silt_core::application::{run_transform, run_stream, ...};`

pub use diff::{diff_model, diff_models};
pub use materializer::Materializer;
pub use profiler::{check_freshness, profile_model};
pub use quality::{run_assertions, run_contracts};
pub use query::run_query;
pub use scheduler::Scheduler;
pub use seed::run_seeds;
pub use snapshot::{create_snapshot, diff_against_snapshot};
pub use stream::run_stream;
pub use transform::{run_transform, CancelToken, RunOptions};
pub use validator::validate_models;
