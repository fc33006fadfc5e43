//! Schema module - Configuration and dataset types for PGE searches.

mod config;
mod problem;

pub use config::*;
pub use problem::*;
