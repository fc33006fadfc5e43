//! PGE - Prioritized Grammar Enumeration.
//!
//! This crate provides a deterministic symbolic regression engine. Instead
//! of evolving a random population, PGE enumerates expression forms from a
//! grammar, fits the free coefficients of each form with nonlinear least
//! squares and expands the most promising forms first. A structural trie
//! guarantees that no form is ever fitted twice.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and datasets
//! - `compute`: Expression trees, fitting, and the search workers and coordinator
//!
//! # Example
//!
//! ```rust,no_run
//! use pge::{
//!     compute::search::Coordinator,
//!     schema::{Point, PointSet, Problem, RunConfig, SearchConfig},
//! };
//!
//! // Sample y = 3x + 1
//! let set = PointSet::new(
//!     (0..50)
//!         .map(|i| {
//!             let x = i as f64 / 10.0;
//!             Point::new(vec![x], 3.0 * x + 1.0)
//!         })
//!         .collect(),
//! );
//!
//! let config = RunConfig {
//!     problem: Problem::new(set.clone(), set),
//!     searches: vec![SearchConfig::default()],
//!     coordinator: Default::default(),
//! };
//!
//! let result = Coordinator::new(config).unwrap().run().unwrap();
//! println!("Best: {}", result.best[0].pretty(&result.var_names));
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::search::{Coordinator, ExprReport, PgeSearch, RunResult};
pub use compute::{Expr, regress};
pub use schema::{Problem, RunConfig, SearchConfig};
