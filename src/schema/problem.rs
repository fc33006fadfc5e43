//! Problem datasets.
//!
//! The fitter only reads through this interface; nothing in the search
//! mutates a problem once it has been validated.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// How points are fed to a candidate during evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// `f(0, x, c, s)`: every input column is an independent variable.
    #[default]
    Benchmark,
    /// `f(x[0], x[1..], c, s)`: the first input column is time.
    Diffeq,
}

/// One sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Independent values.
    pub x: Vec<f64>,
    /// Dependent values; the problem's `search_var` selects the target.
    pub y: Vec<f64>,
}

impl Point {
    pub fn new(x: Vec<f64>, y: f64) -> Self {
        Self { x, y: vec![y] }
    }
}

/// A set of samples sharing one vector of system values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSet {
    pub points: Vec<Point>,
    #[serde(default)]
    pub system: Vec<f64>,
}

impl PointSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points,
            system: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Independent values of point `i`.
    #[inline]
    pub fn independent(&self, i: usize) -> &[f64] {
        &self.points[i].x
    }

    /// Dependent value `var` of point `i`, NaN when absent.
    #[inline]
    pub fn dependent(&self, i: usize, var: usize) -> f64 {
        self.points[i].y.get(var).copied().unwrap_or(f64::NAN)
    }

    pub fn system_values(&self) -> &[f64] {
        &self.system
    }
}

/// A regression problem: training and testing data plus scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub kind: ProblemKind,
    /// Display names for the independent variables.
    #[serde(default)]
    pub var_names: Vec<String>,
    /// Index of the dependent value being modelled.
    #[serde(default)]
    pub search_var: usize,
    /// Residuals below this count as hits.
    #[serde(default = "default_hit_ratio")]
    pub hit_ratio: f64,
    pub train: Vec<PointSet>,
    pub test: Vec<PointSet>,
}

fn default_hit_ratio() -> f64 {
    0.01
}

impl Problem {
    /// Benchmark problem over single train and test sets.
    pub fn new(train: PointSet, test: PointSet) -> Self {
        Self {
            kind: ProblemKind::Benchmark,
            var_names: Vec::new(),
            search_var: 0,
            hit_ratio: default_hit_ratio(),
            train: vec![train],
            test: vec![test],
        }
    }

    /// Width of the input rows.
    fn input_width(&self) -> usize {
        self.train
            .iter()
            .chain(&self.test)
            .flat_map(|set| set.points.first())
            .map(|p| p.x.len())
            .next()
            .unwrap_or(0)
    }

    /// Independent variables a candidate can reference.
    pub fn num_vars(&self) -> usize {
        let width = self.input_width();
        match self.kind {
            ProblemKind::Benchmark => width,
            ProblemKind::Diffeq => width.saturating_sub(1),
        }
    }

    /// System values per point set, taken from the first training set.
    pub fn num_system(&self) -> usize {
        self.train.first().map_or(0, |set| set.system.len())
    }

    /// Display names, falling back to `x{i}`.
    pub fn names(&self) -> Vec<String> {
        (0..self.num_vars())
            .map(|i| {
                self.var_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("x{i}"))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let expected = self.input_width();
        let system = self.num_system();
        for (name, sets) in [("train", &self.train), ("test", &self.test)] {
            if sets.iter().all(PointSet::is_empty) {
                return Err(ConfigError::EmptyDataset(name));
            }
            for (index, set) in sets.iter().enumerate() {
                if set.system.len() != system {
                    return Err(ConfigError::InconsistentSystem {
                        dataset: name,
                        set: index,
                        found: set.system.len(),
                        expected: system,
                    });
                }
            }
            for (point, p) in sets.iter().flat_map(|s| &s.points).enumerate() {
                if p.x.len() != expected {
                    return Err(ConfigError::InconsistentPoint {
                        set: name,
                        point,
                        found: p.x.len(),
                        expected,
                    });
                }
                if self.search_var >= p.y.len() {
                    return Err(ConfigError::SearchVarOutOfRange {
                        index: self.search_var,
                        count: p.y.len(),
                    });
                }
            }
        }
        if self.num_vars() == 0 {
            return Err(ConfigError::NoUsableVariables);
        }
        if !(self.hit_ratio > 0.0 && self.hit_ratio.is_finite()) {
            return Err(ConfigError::InvalidHitRatio(self.hit_ratio));
        }
        Ok(())
    }
}
