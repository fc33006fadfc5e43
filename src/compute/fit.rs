//! Coefficient fitting and scoring.
//!
//! [`regress`] turns an expression into a scored [`ExprReport`]: numeric
//! leaves become free coefficients, a Levenberg-Marquardt solve fits them
//! against the training data, and the fitted tree is scored on both splits.
//! All buffers are allocated per call so any number of evaluator threads can
//! fit concurrently.

use nalgebra::{DMatrix, DVector};

use super::expr::Expr;
use super::search::{ExprReport, Scores};
use crate::schema::{FitConfig, PointSet, Problem, ProblemKind};

/// Damping beyond which a step is considered hopeless.
const MAX_LAMBDA: f64 = 1e12;
const MIN_LAMBDA: f64 = 1e-12;

/// Fit and score one candidate.
pub fn regress(expr: &Expr, problem: &Problem, config: &FitConfig) -> ExprReport {
    let mut guess = Vec::new();
    let eqn = expr.convert_to_coefficients(&mut guess);

    let coeff = if guess.is_empty() {
        guess
    } else {
        levenberg_marquardt(&eqn, problem, guess, config)
    };

    let train = score_split(&eqn, problem, &problem.train, &coeff);
    let test = score_split(&eqn, problem, &problem.test, &coeff);
    let scores = Scores {
        train_error: train.l1,
        test_error: test.l2,
        pred_error: test.l1,
        train_hits: train.hits_l1,
        test_hits: test.hits_l1,
        pred_hits: test.hits_l2,
        test_evals: test.evals,
        train_nans: train.nans,
        test_nans: test.nans,
    };
    ExprReport::new(eqn, coeff, scores)
}

#[inline]
fn eval_point(eqn: &Expr, kind: ProblemKind, set: &PointSet, i: usize, coeff: &[f64]) -> f64 {
    let x = set.independent(i);
    match kind {
        ProblemKind::Benchmark => eqn.evaluate(0.0, x, coeff, set.system_values()),
        ProblemKind::Diffeq => match x.split_first() {
            Some((t, rest)) => eqn.evaluate(*t, rest, coeff, set.system_values()),
            None => f64::NAN,
        },
    }
}

/// Training residuals `f(x) - y` for every point of every training set.
fn residuals(eqn: &Expr, problem: &Problem, coeff: &[f64]) -> DVector<f64> {
    let values: Vec<f64> = problem
        .train
        .iter()
        .flat_map(|set| {
            (0..set.len()).map(move |i| {
                eval_point(eqn, problem.kind, set, i, coeff) - set.dependent(i, problem.search_var)
            })
        })
        .collect();
    DVector::from_vec(values)
}

/// Forward-difference Jacobian of the residuals.
fn jacobian(
    eqn: &Expr,
    problem: &Problem,
    coeff: &[f64],
    base: &DVector<f64>,
    jac: &mut DMatrix<f64>,
) {
    let mut nudged = coeff.to_vec();
    for j in 0..coeff.len() {
        let h = 1e-7 * coeff[j].abs().max(1.0);
        nudged[j] = coeff[j] + h;
        let shifted = residuals(eqn, problem, &nudged);
        for i in 0..base.len() {
            jac[(i, j)] = (shifted[i] - base[i]) / h;
        }
        nudged[j] = coeff[j];
    }
}

/// Minimize the squared training residuals starting from `coeff`.
///
/// Returns the best coefficients found. A start with a non-finite cost is
/// returned unchanged; scoring will then reject it.
fn levenberg_marquardt(
    eqn: &Expr,
    problem: &Problem,
    mut coeff: Vec<f64>,
    config: &FitConfig,
) -> Vec<f64> {
    let mut r = residuals(eqn, problem, &coeff);
    let mut cost = r.norm_squared();
    if !cost.is_finite() || r.is_empty() {
        return coeff;
    }

    let m = coeff.len();
    let mut jac = DMatrix::zeros(r.len(), m);
    let mut lambda = config.initial_lambda;

    for _ in 0..config.max_iterations {
        if cost == 0.0 {
            break;
        }
        jacobian(eqn, problem, &coeff, &r, &mut jac);
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let rhs = (&jt * &r).map(|g| -g);

        let mut accepted = None;
        while lambda < MAX_LAMBDA {
            let mut a = jtj.clone();
            for i in 0..m {
                a[(i, i)] += lambda * jtj[(i, i)].max(MIN_LAMBDA);
            }
            let Some(delta) = a.lu().solve(&rhs) else {
                lambda *= 10.0;
                continue;
            };
            let trial: Vec<f64> = coeff.iter().zip(delta.iter()).map(|(c, d)| c + d).collect();
            let trial_r = residuals(eqn, problem, &trial);
            let trial_cost = trial_r.norm_squared();
            if trial_cost.is_finite() && trial_cost < cost {
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                accepted = Some((trial, trial_r, trial_cost, delta.norm()));
                break;
            }
            lambda *= 10.0;
        }

        let Some((trial, trial_r, trial_cost, step)) = accepted else {
            break;
        };
        let gain = (cost - trial_cost) / cost;
        coeff = trial;
        r = trial_r;
        cost = trial_cost;

        let scale = coeff.iter().map(|c| c * c).sum::<f64>().sqrt();
        if gain < config.tolerance || step < config.tolerance * (1.0 + scale) {
            break;
        }
    }
    coeff
}

/// Residual statistics on one split.
#[derive(Debug, Clone, Copy)]
struct SplitScore {
    l1: f64,
    l2: f64,
    hits_l1: usize,
    hits_l2: usize,
    evals: usize,
    nans: usize,
}

fn score_split(eqn: &Expr, problem: &Problem, sets: &[PointSet], coeff: &[f64]) -> SplitScore {
    let (mut l1_sum, mut l2_sum) = (0.0, 0.0);
    let (mut hits_l1, mut hits_l2, mut evals, mut nans) = (0, 0, 0, 0);

    for set in sets {
        for i in 0..set.len() {
            let out = eval_point(eqn, problem.kind, set, i, coeff);
            if !out.is_finite() {
                nans += 1;
                continue;
            }
            evals += 1;

            let diff = out - set.dependent(i, problem.search_var);
            let l1 = diff.abs();
            let l2 = diff * diff;
            l1_sum += l1;
            l2_sum += l2;
            if l1 < problem.hit_ratio {
                hits_l1 += 1;
            }
            if l2 < problem.hit_ratio {
                hits_l2 += 1;
            }
        }
    }

    let (l1, l2) = if evals == 0 {
        (f64::NAN, f64::NAN)
    } else {
        let n = evals as f64;
        (l1_sum / n, (l2_sum / n).sqrt())
    };
    SplitScore {
        l1,
        l2,
        hits_l1,
        hits_l2,
        evals,
        nans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::expr::UnaryOp;
    use crate::schema::Point;

    fn sampled(f: impl Fn(f64) -> f64, n: usize) -> PointSet {
        PointSet::new(
            (0..n)
                .map(|i| {
                    let x = 0.1 + 2.0 * i as f64 / n as f64;
                    Point::new(vec![x], f(x))
                })
                .collect(),
        )
    }

    fn problem(f: impl Fn(f64) -> f64 + Copy) -> Problem {
        Problem::new(sampled(f, 40), sampled(f, 15))
    }

    #[test]
    fn test_linear_fit() {
        let p = problem(|x| 2.0 * x + 1.0);
        let e = Expr::Add(vec![Expr::coeff(), Expr::scaled(Expr::var(0))]);
        let r = regress(&e, &p, &FitConfig::default());
        assert_eq!(r.coeff().len(), 2);
        assert!((r.coeff()[0] - 1.0).abs() < 1e-6, "{:?}", r.coeff());
        assert!((r.coeff()[1] - 2.0).abs() < 1e-6, "{:?}", r.coeff());
        assert!(r.test_error() < 1e-6);
        assert_eq!(r.scores().test_hits, 15);
        assert_eq!(r.scores().test_evals, 15);
    }

    #[test]
    fn test_nonlinear_fit() {
        let p = problem(|x| 1.5 * (0.5 * x).exp());
        let e = Expr::Mul(vec![
            Expr::coeff(),
            Expr::unary(UnaryOp::Exp, Expr::scaled(Expr::var(0))),
        ]);
        let r = regress(&e, &p, &FitConfig::default());
        assert!(r.test_error() < 1e-4, "error {}", r.test_error());
    }

    #[test]
    fn test_no_coefficients_scored_as_is() {
        let p = problem(|x| x);
        let r = regress(&Expr::var(0), &p, &FitConfig::default());
        assert!(r.coeff().is_empty());
        assert_eq!(r.train_error(), 0.0);
        assert_eq!(r.test_error(), 0.0);
    }

    #[test]
    fn test_all_nan_split_reports_nan() {
        let p = problem(|x| x);
        // Benchmark problems evaluate with t = 0
        let e = Expr::div(Expr::var(0), Expr::Time);
        let r = regress(&e, &p, &FitConfig::default());
        assert!(r.test_error().is_nan());
        assert!(r.train_error().is_nan());
        assert_eq!(r.scores().train_nans, 40);
        assert_eq!(r.scores().test_evals, 0);
    }

    #[test]
    fn test_diffeq_uses_time_column() {
        let set = PointSet::new(
            (1..10)
                .map(|i| {
                    let t = i as f64;
                    Point::new(vec![t, 2.0], 2.0 * t)
                })
                .collect(),
        );
        let mut p = Problem::new(set.clone(), set);
        p.kind = ProblemKind::Diffeq;
        let e = Expr::Mul(vec![Expr::Time, Expr::var(0)]);
        let r = regress(&e, &p, &FitConfig::default());
        assert_eq!(r.test_error(), 0.0);
    }

    #[test]
    fn test_literals_become_coefficients() {
        let p = problem(|x| 3.0 * x);
        let e = Expr::Mul(vec![Expr::Literal(2.5), Expr::var(0)]);
        let r = regress(&e, &p, &FitConfig::default());
        assert_eq!(r.expr().coefficient_count(), 1);
        assert!((r.coeff()[0] - 3.0).abs() < 1e-6);
    }
}
