// silt-core/src/lib.rs

#![allow(missing_docs)]
// Memory safety
#![deny(unsafe_code)]
// Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// Performance
#![warn(clippy::perf)]

// 1. Ports (Interfaces / Traits)
// Contracts between the engine and its adapters (Executor...)
pub mod ports;

// 2. Domain (pure types and algorithms)
// Models, directives, DAG, assertion grammar, cron.
// Depends on nothing else (no infra, no application).
pub mod domain;

// 3. Infrastructure (Adapters)
// DuckDB warehouse, metadata store, discovery, project config.
pub mod infrastructure;

// 4. Application (Use Cases)
// Transform runs, materialization, quality, lineage, streams, scheduler.
pub mod application;

// --- GLOBAL ERROR HANDLING ---
pub mod error;

// --- RE-EXPORTS (FACADE) ---
pub use error::SiltError;
