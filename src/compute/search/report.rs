//! Fitted candidate reports.

use serde::{Deserialize, Serialize};

use crate::compute::expr::Expr;
use crate::schema::Metric;

/// Identity stamped onto a report when it enters a worker's live queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId {
    /// Sequence number within the owning worker.
    pub unique: usize,
    pub worker: usize,
    pub generation: usize,
    /// Position within the generation.
    pub unit: usize,
}

/// Scores of one fitted expression on the train and test splits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Mean absolute residual on the training data.
    pub train_error: f64,
    /// Root-mean-square residual on the test data.
    pub test_error: f64,
    /// Mean absolute residual on the test data.
    pub pred_error: f64,
    pub train_hits: usize,
    pub test_hits: usize,
    pub pred_hits: usize,
    /// Finite evaluations on the test data.
    pub test_evals: usize,
    /// NaN/Inf evaluations on the training data.
    pub train_nans: usize,
    /// NaN/Inf evaluations on the test data.
    pub test_nans: usize,
}

impl Default for Scores {
    fn default() -> Self {
        Self {
            train_error: f64::NAN,
            test_error: f64::NAN,
            pred_error: f64::NAN,
            train_hits: 0,
            test_hits: 0,
            pred_hits: 0,
            test_evals: 0,
            train_nans: 0,
            test_nans: 0,
        }
    }
}

/// A fitted candidate.
///
/// The expression, coefficients and scores are fixed at construction; only
/// the identity can be stamped afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExprReport {
    expr: Expr,
    coeff: Vec<f64>,
    size: usize,
    scores: Scores,
    id: ReportId,
}

impl ExprReport {
    pub fn new(expr: Expr, coeff: Vec<f64>, scores: Scores) -> Self {
        let size = expr.size();
        Self {
            expr,
            coeff,
            size,
            scores,
            id: ReportId::default(),
        }
    }

    #[inline]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    #[inline]
    pub fn coeff(&self) -> &[f64] {
        &self.coeff
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    #[inline]
    pub fn train_error(&self) -> f64 {
        self.scores.train_error
    }

    #[inline]
    pub fn test_error(&self) -> f64 {
        self.scores.test_error
    }

    #[inline]
    pub fn id(&self) -> ReportId {
        self.id
    }

    pub fn stamp(&mut self, id: ReportId) {
        self.id = id;
    }

    /// Value of a ranking metric; hit counts are widened to `f64`.
    pub fn metric(&self, metric: Metric) -> f64 {
        let s = &self.scores;
        match metric {
            Metric::TrainError => s.train_error,
            Metric::TestError => s.test_error,
            Metric::PredError => s.pred_error,
            Metric::TrainHits => s.train_hits as f64,
            Metric::TestHits => s.test_hits as f64,
            Metric::PredHits => s.pred_hits as f64,
        }
    }

    /// Exactly one coefficient and it is effectively zero.
    pub fn is_trivial(&self, zero_epsilon: f64) -> bool {
        self.coeff.len() == 1 && self.coeff[0].abs() < zero_epsilon
    }

    /// Any coefficient is effectively zero.
    pub fn has_zero_coeff(&self, zero_epsilon: f64) -> bool {
        self.coeff.iter().any(|c| c.abs() < zero_epsilon)
    }

    /// Human readable form with fitted values substituted.
    pub fn pretty(&self, names: &[String]) -> String {
        self.expr.pretty(names, &self.coeff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(coeff: Vec<f64>) -> ExprReport {
        let mut e = Expr::Add(vec![Expr::scaled(Expr::var(0)), Expr::coeff()]);
        e.index_coefficients();
        ExprReport::new(e, coeff, Scores::default())
    }

    #[test]
    fn test_size_is_derived() {
        let r = report(vec![1.0, 2.0]);
        assert_eq!(r.size(), r.expr().size());
        assert_eq!(r.size(), 3);
    }

    #[test]
    fn test_zero_filters() {
        assert!(!report(vec![1.0, 1e-12]).is_trivial(1e-6));
        assert!(report(vec![1.0, 1e-12]).has_zero_coeff(1e-6));
        assert!(report(vec![1e-12]).is_trivial(1e-6));
        assert!(!report(vec![1.0, 2.0]).has_zero_coeff(1e-6));
    }

    #[test]
    fn test_stamp_only_touches_identity() {
        let mut r = report(vec![1.0, 2.0]);
        let id = ReportId {
            unique: 7,
            worker: 1,
            generation: 3,
            unit: 2,
        };
        r.stamp(id);
        assert_eq!(r.id(), id);
        assert_eq!(r.coeff(), &[1.0, 2.0]);
    }

    #[test]
    fn test_metric_reads_hits() {
        let scores = Scores {
            test_hits: 4,
            ..Scores::default()
        };
        let r = ExprReport::new(Expr::var(0), Vec::new(), scores);
        assert_eq!(r.metric(Metric::TestHits), 4.0);
        assert!(r.metric(Metric::TestError).is_nan());
    }
}
