pub mod executor;

pub use executor::{ColumnSchema, Executor};
