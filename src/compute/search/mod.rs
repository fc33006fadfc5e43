//! Prioritized grammar enumeration.
//!
//! The search is organised bottom-up:
//!
//! - **Reports** (`report`): a fitted expression and its scores
//! - **Queues** (`queue`): ordered report containers with Pareto support
//! - **Dedup trie** (`trie`): remembers every form ever generated
//! - **Grammar** (`grammar`): operator sets, leaves and size bounds
//! - **Expansion** (`expand`): grows a candidate into its children
//! - **Worker** (`worker`): one search with its own evaluator pool
//! - **Coordinator** (`coordinator`): runs workers and merges their best sets
//!
//! # Example
//!
//! ```rust,no_run
//! use pge::schema::RunConfig;
//! use pge::compute::search::Coordinator;
//!
//! let config = RunConfig::from_file("run.json").unwrap();
//! let result = Coordinator::new(config).unwrap().run().unwrap();
//! for report in &result.best {
//!     println!("{:.4e}  {}", report.test_error(), report.pretty(&result.var_names));
//! }
//! ```

mod coordinator;
mod expand;
mod grammar;
mod queue;
mod report;
mod trie;
mod worker;

pub use coordinator::*;
pub use expand::*;
pub use grammar::*;
pub use queue::*;
pub use report::*;
pub use trie::*;
pub use worker::*;

use crate::schema::ConfigError;

/// Errors raised while starting a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}
