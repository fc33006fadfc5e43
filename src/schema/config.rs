//! Search configuration types.
//!
//! Every type here deserializes from JSON with sensible defaults and exposes a
//! `validate()` method that must succeed before any search thread is started.

use serde::{Deserialize, Serialize};

use super::Problem;
use crate::compute::expr::{ExprError, ExprKind};

// ============================================================================
// Run
// ============================================================================

/// Top-level configuration: one problem, several concurrent searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Dataset and scoring settings shared by every search.
    pub problem: Problem,
    /// One entry per concurrent worker search.
    pub searches: Vec<SearchConfig>,
    /// Merge and stop settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl RunConfig {
    /// Parse from a JSON string and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.problem.validate()?;
        if self.searches.is_empty() {
            return Err(ConfigError::NoSearches);
        }
        for search in &self.searches {
            search.validate(&self.problem)?;
        }
        self.coordinator.validate()
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Stop once worker 0 reports a generation beyond this bound.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Size of the merged best-set.
    #[serde(default = "default_best_count")]
    pub best_count: usize,
    /// Sleep between polls when no worker has anything to say.
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// Capacity of each worker's upward report and progress channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            best_count: default_best_count(),
            idle_sleep_ms: default_idle_sleep_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.best_count == 0 {
            return Err(ConfigError::InvalidCount("best_count"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidCount("channel_capacity"));
        }
        Ok(())
    }
}

fn default_max_iterations() -> usize {
    100
}
fn default_best_count() -> usize {
    32
}
fn default_idle_sleep_ms() -> u64 {
    1
}
fn default_channel_capacity() -> usize {
    64
}

// ============================================================================
// Search
// ============================================================================

/// Configuration for one worker search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Grammar operator sets and bounds.
    #[serde(default)]
    pub tree: TreeConfig,
    /// Simplification rules applied to every generated candidate.
    #[serde(default)]
    pub simplify: SimpRules,
    /// How the initial candidates are built.
    #[serde(default)]
    pub init_method: InitMethod,
    /// How peeled candidates are grown.
    #[serde(default)]
    pub grow_method: GrowMethod,
    /// Candidates popped from the live queue per generation.
    #[serde(default = "default_peel_count")]
    pub peel_count: usize,
    /// Evaluator threads fitting candidates.
    #[serde(default = "default_eval_workers")]
    pub eval_workers: usize,
    /// Capacity of the evaluator input and output queues.
    #[serde(default = "default_eval_queue_capacity")]
    pub eval_queue_capacity: usize,
    /// Maximum candidates held by the live queue and the best archive.
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
    /// Order of the live queue.
    #[serde(default = "default_queue_order")]
    pub queue_order: SortKey,
    /// Order of the best archive and of upward reports.
    #[serde(default = "default_queue_order")]
    pub best_order: SortKey,
    /// Fitted coefficients below this magnitude mark a degenerate fit.
    #[serde(default = "default_zero_epsilon")]
    pub zero_epsilon: f64,
    /// Candidates included in each upward report.
    #[serde(default = "default_report_count")]
    pub report_count: usize,
    /// Report every this many generations (the final generation always reports).
    #[serde(default = "default_report_epoch")]
    pub report_epoch: usize,
    /// Stop on our own after this many generations.
    #[serde(default)]
    pub max_generations: Option<usize>,
    /// Products with more factors than this are not extended by basis terms.
    #[serde(default = "default_max_basis_factors")]
    pub max_basis_factors: usize,
    /// Coefficient fitter settings.
    #[serde(default)]
    pub fit: FitConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tree: TreeConfig::default(),
            simplify: SimpRules::default(),
            init_method: InitMethod::default(),
            grow_method: GrowMethod::default(),
            peel_count: default_peel_count(),
            eval_workers: default_eval_workers(),
            eval_queue_capacity: default_eval_queue_capacity(),
            archive_capacity: default_archive_capacity(),
            queue_order: default_queue_order(),
            best_order: default_queue_order(),
            zero_epsilon: default_zero_epsilon(),
            report_count: default_report_count(),
            report_epoch: default_report_epoch(),
            max_generations: None,
            max_basis_factors: default_max_basis_factors(),
            fit: FitConfig::default(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self, problem: &Problem) -> Result<(), ConfigError> {
        self.tree.validate(problem.num_vars())?;
        if self.tree.uses_system() && self.tree.num_system != problem.num_system() {
            return Err(ConfigError::SystemCountMismatch {
                configured: self.tree.num_system,
                available: problem.num_system(),
            });
        }
        if self.peel_count == 0 {
            return Err(ConfigError::InvalidCount("peel_count"));
        }
        if self.eval_workers == 0 {
            return Err(ConfigError::InvalidCount("eval_workers"));
        }
        if self.eval_queue_capacity == 0 {
            return Err(ConfigError::InvalidCount("eval_queue_capacity"));
        }
        if self.archive_capacity == 0 {
            return Err(ConfigError::InvalidCount("archive_capacity"));
        }
        if self.report_count == 0 {
            return Err(ConfigError::InvalidCount("report_count"));
        }
        if self.report_epoch == 0 {
            return Err(ConfigError::InvalidCount("report_epoch"));
        }
        if !(self.zero_epsilon.is_finite() && self.zero_epsilon >= 0.0) {
            return Err(ConfigError::InvalidZeroEpsilon(self.zero_epsilon));
        }
        self.fit.validate()
    }
}

fn default_peel_count() -> usize {
    3
}
fn default_eval_workers() -> usize {
    4
}
fn default_eval_queue_capacity() -> usize {
    4096
}
fn default_archive_capacity() -> usize {
    1 << 20
}
fn default_queue_order() -> SortKey {
    SortKey::Pareto(Metric::TestError)
}
fn default_zero_epsilon() -> f64 {
    1e-6
}
fn default_report_count() -> usize {
    16
}
fn default_report_epoch() -> usize {
    1
}
fn default_max_basis_factors() -> usize {
    3
}

/// Initial candidate construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// One small template per root kind and usable variable.
    #[default]
    Templates,
    /// The basis library itself.
    Basis,
}

/// Expansion strategy applied to peeled candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowMethod {
    /// Add terms to sums, widen products, deepen variables.
    #[default]
    Structural,
    /// Basis extension that also nests basis terms inside function arguments.
    BasisNested,
    /// Basis extension: append and multiply only.
    Basis,
}

// ============================================================================
// Ordering
// ============================================================================

/// Scalar a candidate can be ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TrainError,
    TestError,
    PredError,
    TrainHits,
    TestHits,
    PredHits,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::TrainError,
        Metric::TestError,
        Metric::PredError,
        Metric::TrainHits,
        Metric::TestHits,
        Metric::PredHits,
    ];

    /// Errors improve downward, hit counts upward.
    pub fn lower_is_better(self) -> bool {
        matches!(self, Self::TrainError | Self::TestError | Self::PredError)
    }
}

/// Comparator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Size only.
    Size,
    /// Metric only.
    Metric(Metric),
    /// Size first, then metric.
    SizeThen(Metric),
    /// Metric first, then size.
    ThenSize(Metric),
    /// Non-dominated layering on size and metric.
    Pareto(Metric),
}

impl SortKey {
    /// Every comparator shape, 25 in total.
    pub fn all() -> Vec<SortKey> {
        let mut keys = vec![SortKey::Size];
        for m in Metric::ALL {
            keys.extend([
                SortKey::Metric(m),
                SortKey::SizeThen(m),
                SortKey::ThenSize(m),
                SortKey::Pareto(m),
            ]);
        }
        keys
    }
}

// ============================================================================
// Grammar
// ============================================================================

/// Grammar description: operator names and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Root kinds for initial templates (`add`, `mul`, `div`).
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,
    /// Interior node kinds (unary functions and `div`).
    #[serde(default = "default_nodes")]
    pub nodes: Vec<String>,
    /// Leaf kinds (`var`, `time`, `system`, `constant`).
    #[serde(default = "default_leafs")]
    pub leafs: Vec<String>,
    /// Non-trigonometric node kinds usable where trig nesting is unwanted.
    #[serde(default)]
    pub non_trig: Vec<String>,
    /// Independent variables the search may use. Empty means all.
    #[serde(default)]
    pub usable_vars: Vec<usize>,
    /// Number of system values available as leaves.
    #[serde(default)]
    pub num_system: usize,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_min_height")]
    pub min_height: usize,
    #[serde(default = "default_max_height")]
    pub max_height: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            nodes: default_nodes(),
            leafs: default_leafs(),
            non_trig: Vec::new(),
            usable_vars: Vec::new(),
            num_system: 0,
            min_size: default_min_size(),
            max_size: default_max_size(),
            min_height: default_min_height(),
            max_height: default_max_height(),
        }
    }
}

impl TreeConfig {
    /// Whether `system` is among the leaf kinds.
    pub fn uses_system(&self) -> bool {
        self.leafs.iter().any(|l| l == "system")
    }

    /// Check bounds and operator names against a problem with `num_vars`
    /// independent variables.
    pub fn validate(&self, num_vars: usize) -> Result<(), ConfigError> {
        if self.min_size == 0 || self.min_size > self.max_size {
            return Err(ConfigError::InvalidSizeBounds {
                min: self.min_size,
                max: self.max_size,
            });
        }
        if self.min_height == 0 || self.min_height > self.max_height {
            return Err(ConfigError::InvalidHeightBounds {
                min: self.min_height,
                max: self.max_height,
            });
        }

        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        for name in &self.roots {
            let kind = parse_kind(name)?;
            if !matches!(kind, ExprKind::Add | ExprKind::Mul | ExprKind::Div) {
                return Err(ConfigError::IllegalRoot(name.clone()));
            }
        }
        for name in &self.leafs {
            if !parse_kind(name)?.is_leaf() {
                return Err(ConfigError::IllegalLeaf(name.clone()));
            }
        }
        for name in self.nodes.iter().chain(&self.non_trig) {
            let kind = parse_kind(name)?;
            if !(kind.is_unary() || kind == ExprKind::Div) {
                return Err(ConfigError::IllegalNode(name.clone()));
            }
        }

        if num_vars == 0 {
            return Err(ConfigError::NoUsableVariables);
        }
        for &index in &self.usable_vars {
            if index >= num_vars {
                return Err(ConfigError::VariableOutOfRange {
                    index,
                    count: num_vars,
                });
            }
        }
        Ok(())
    }

    /// Usable variable indices, defaulting to every variable.
    pub fn resolved_vars(&self, num_vars: usize) -> Vec<usize> {
        if self.usable_vars.is_empty() {
            (0..num_vars).collect()
        } else {
            self.usable_vars.clone()
        }
    }
}

/// Resolve an operator name.
pub fn parse_kind(name: &str) -> Result<ExprKind, ConfigError> {
    name.parse()
        .map_err(|_: ExprError| ConfigError::UnknownOperator(name.to_string()))
}

/// Resolve a list of operator names, dropping repeats.
pub fn parse_kinds(names: &[String]) -> Result<Vec<ExprKind>, ConfigError> {
    let mut kinds = Vec::with_capacity(names.len());
    for name in names {
        let kind = parse_kind(name)?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn default_roots() -> Vec<String> {
    vec!["add".into()]
}
fn default_nodes() -> Vec<String> {
    Vec::new()
}
fn default_leafs() -> Vec<String> {
    vec!["var".into()]
}
fn default_min_size() -> usize {
    1
}
fn default_max_size() -> usize {
    32
}
fn default_min_height() -> usize {
    1
}
fn default_max_height() -> usize {
    6
}

// ============================================================================
// Simplification and fitting
// ============================================================================

/// Rule set applied by expression simplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpRules {
    /// Merge numeric leaves in sums and products into one free coefficient,
    /// and fold functions of constants.
    #[serde(default = "default_true")]
    pub convert_consts: bool,
    /// Drop sum terms that only differ from an earlier scaled term by their
    /// coefficients.
    #[serde(default = "default_true")]
    pub group_add_terms: bool,
    /// Combine repeated factors into integer powers and collapse nested powers.
    #[serde(default = "default_true")]
    pub collapse_powers: bool,
}

impl Default for SimpRules {
    fn default() -> Self {
        Self {
            convert_consts: true,
            group_add_terms: true,
            collapse_powers: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Levenberg-Marquardt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default = "default_fit_iterations")]
    pub max_iterations: usize,
    /// Starting damping factor.
    #[serde(default = "default_initial_lambda")]
    pub initial_lambda: f64,
    /// Relative cost improvement (and step size) below which fitting stops.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_fit_iterations(),
            initial_lambda: default_initial_lambda(),
            tolerance: default_tolerance(),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidCount("fit.max_iterations"));
        }
        if !(self.initial_lambda > 0.0 && self.initial_lambda.is_finite()) {
            return Err(ConfigError::InvalidFitParameter("initial_lambda"));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(ConfigError::InvalidFitParameter("tolerance"));
        }
        Ok(())
    }
}

fn default_fit_iterations() -> usize {
    100
}
fn default_initial_lambda() -> f64 {
    1e-3
}
fn default_tolerance() -> f64 {
    1e-10
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors. These abort the run before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid size bounds: min {min}, max {max}")]
    InvalidSizeBounds { min: usize, max: usize },
    #[error("Invalid height bounds: min {min}, max {max}")]
    InvalidHeightBounds { min: usize, max: usize },
    #[error("Unknown operator name: {0:?}")]
    UnknownOperator(String),
    #[error("At least one root kind is required")]
    NoRoots,
    #[error("Operator {0:?} cannot be a root (expected add, mul or div)")]
    IllegalRoot(String),
    #[error("Operator {0:?} cannot be a leaf")]
    IllegalLeaf(String),
    #[error("Operator {0:?} cannot be an interior node")]
    IllegalNode(String),
    #[error("Problem has no independent variables")]
    NoUsableVariables,
    #[error("Variable index {index} out of range ({count} variables)")]
    VariableOutOfRange { index: usize, count: usize },
    #[error("The {0} dataset is empty")]
    EmptyDataset(&'static str),
    #[error("Point {point} of the {set} dataset has {found} inputs, expected {expected}")]
    InconsistentPoint {
        set: &'static str,
        point: usize,
        found: usize,
        expected: usize,
    },
    #[error("Set {set} of the {dataset} dataset has {found} system values, expected {expected}")]
    InconsistentSystem {
        dataset: &'static str,
        set: usize,
        found: usize,
        expected: usize,
    },
    #[error("{configured} system leaves configured, the problem provides {available}")]
    SystemCountMismatch { configured: usize, available: usize },
    #[error("Search variable {index} out of range ({count} outputs)")]
    SearchVarOutOfRange { index: usize, count: usize },
    #[error("Hit ratio must be positive and finite, got {0}")]
    InvalidHitRatio(f64),
    #[error("Zero epsilon must be non-negative and finite, got {0}")]
    InvalidZeroEpsilon(f64),
    #[error("{0} must be non-zero")]
    InvalidCount(&'static str),
    #[error("Invalid fitter parameter: {0}")]
    InvalidFitParameter(&'static str),
    #[error("No searches configured")]
    NoSearches,
    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
