pub mod contract;
pub mod directive;
pub mod error;
pub mod graph;
pub mod model;
pub mod quality;
pub mod schedule;

// Convenient re-exports for the rest of the crate
pub use error::DomainError;
pub use model::{IncrementalStrategy, Materialization, SqlModel};
