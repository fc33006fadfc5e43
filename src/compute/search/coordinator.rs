//! Multi-search coordinator.
//!
//! Starts one [`PgeSearch`] per configured search on its own thread, polls
//! their channels without blocking and keeps a merged best-set. Stopping
//! sends [`Command::Stop`] to every worker and keeps draining reports until
//! each one has acknowledged.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::TryRecvError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{
    Command, CoordinatorLink, ExprReport, Order, PgeSearch, ReportQueue, SearchError, SearchStats,
    link,
};
use crate::schema::{ConfigError, Metric, RunConfig, SortKey};

/// Why the coordinator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Worker 0 passed the iteration bound.
    MaxIterations,
    /// Every worker stopped on its own.
    WorkersFinished,
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone)]
pub struct RunProgress {
    /// Latest generation reported by worker 0.
    pub iteration: usize,
    pub best_error: f64,
    pub best: Option<String>,
    pub best_count: usize,
}

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Merged best-set, best first.
    pub best: Vec<ExprReport>,
    pub var_names: Vec<String>,
    pub iterations: usize,
    pub stop_reason: StopReason,
    pub stats: Vec<SearchStats>,
    pub elapsed_seconds: f64,
}

/// Coordinator-side view of one worker.
struct WorkerSlot {
    id: usize,
    link: CoordinatorLink,
    generation: usize,
    latest: Vec<ExprReport>,
    acked: bool,
    thread: Option<JoinHandle<SearchStats>>,
}

/// Runs the configured searches to completion.
pub struct Coordinator {
    config: RunConfig,
}

impl Coordinator {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run (blocking).
    pub fn run(&self) -> Result<RunResult, SearchError> {
        self.run_with_callback(|_| {})
    }

    /// Run with a callback invoked whenever new reports were merged.
    pub fn run_with_callback<F>(&self, mut callback: F) -> Result<RunResult, SearchError>
    where
        F: FnMut(&RunProgress),
    {
        let start_time = Instant::now();
        let settings = &self.config.coordinator;
        let problem = Arc::new(self.config.problem.clone());
        let names = problem.names();
        let idle = Duration::from_millis(settings.idle_sleep_ms);

        let mut slots = Vec::with_capacity(self.config.searches.len());
        for (id, search_config) in self.config.searches.iter().enumerate() {
            let search = PgeSearch::new(id, search_config.clone(), Arc::clone(&problem))?;
            let (coord_link, worker_link) = link(settings.channel_capacity);
            let handle = thread::Builder::new()
                .name(format!("pge-search-{id}"))
                .spawn(move || search.run(worker_link))
                .map_err(SearchError::Spawn)?;
            slots.push(WorkerSlot {
                id,
                link: coord_link,
                generation: 0,
                latest: Vec::new(),
                acked: false,
                thread: Some(handle),
            });
        }
        info!("Started {} searches", slots.len());

        let mut best: Vec<ExprReport> = Vec::new();
        let stop_reason = loop {
            let busy = poll(&mut slots, &mut best, settings.best_count);
            if busy {
                callback(&progress(&slots, &best, &names));
            }

            if slots[0].generation > settings.max_iterations {
                break StopReason::MaxIterations;
            }
            if slots.iter().all(|s| s.acked) {
                break StopReason::WorkersFinished;
            }
            if !busy {
                thread::sleep(idle);
            }
        };
        info!("Stopping searches: {stop_reason:?}");

        for slot in slots.iter().filter(|s| !s.acked) {
            if slot.link.commands.send(Command::Stop).is_err() {
                debug!("Worker {} already gone", slot.id);
            }
        }
        while slots.iter().any(|s| !s.acked) {
            if !poll(&mut slots, &mut best, settings.best_count) {
                thread::sleep(idle);
            }
        }
        callback(&progress(&slots, &best, &names));

        let iterations = slots[0].generation;
        let mut stats = Vec::with_capacity(slots.len());
        for slot in &mut slots {
            let Some(handle) = slot.thread.take() else {
                continue;
            };
            match handle.join() {
                Ok(s) => stats.push(s),
                Err(_) => return Err(SearchError::WorkerPanicked(slot.id)),
            }
        }

        let elapsed = start_time.elapsed().as_secs_f64();
        info!(
            "Search finished after {} iterations in {:.2}s, {} expressions in best set",
            iterations,
            elapsed,
            best.len()
        );

        Ok(RunResult {
            best,
            var_names: names,
            iterations,
            stop_reason,
            stats,
            elapsed_seconds: elapsed,
        })
    }
}

/// Drain every worker's channels once; `true` when anything arrived.
fn poll(slots: &mut [WorkerSlot], best: &mut Vec<ExprReport>, keep: usize) -> bool {
    let mut received = false;
    let mut merged = false;

    for slot in slots.iter_mut() {
        // Acks first: a worker's final report precedes its ack, so it is
        // drained below in the same pass.
        if !slot.acked {
            match slot.link.acks.try_recv() {
                Ok(_) => {
                    slot.acked = true;
                    received = true;
                    debug!("Worker {} acknowledged", slot.id);
                }
                Err(TryRecvError::Disconnected) => {
                    warn!("Worker {} disconnected without acknowledging", slot.id);
                    slot.acked = true;
                }
                Err(TryRecvError::Empty) => {}
            }
        }

        for p in slot.link.progress.try_iter() {
            slot.generation = p.generation;
            received = true;
            if slot.id == 0 {
                debug!("Worker 0 finished generation {}", p.generation);
            }
        }
        for batch in slot.link.reports.try_iter() {
            slot.latest = batch.reports;
            merged = true;
            received = true;
        }
    }

    if merged {
        let incoming = slots.iter().flat_map(|s| s.latest.iter());
        *best = merge_reports(best, incoming, keep);
    }
    received
}

/// Union `current` and `incoming`, drop near-duplicates and keep the best
/// `keep` by Pareto rank on test error.
///
/// Among near-duplicates the lower test error survives.
pub fn merge_reports<'a>(
    current: &'a [ExprReport],
    incoming: impl IntoIterator<Item = &'a ExprReport>,
    keep: usize,
) -> Vec<ExprReport> {
    let mut pool: Vec<ExprReport> = current.iter().chain(incoming).cloned().collect();
    pool.sort_by(|a, b| {
        a.expr()
            .cmp_structure(b.expr())
            .then_with(|| rank(a).total_cmp(&rank(b)))
    });

    let mut unique: Vec<ExprReport> = Vec::with_capacity(pool.len());
    for report in pool {
        match unique
            .iter_mut()
            .find(|u| u.expr().is_almost_same(report.expr()))
        {
            Some(kept) if rank(&report) < rank(kept) => *kept = report,
            Some(_) => {}
            None => unique.push(report),
        }
    }

    ReportQueue::from_vec(
        Order::best_first(SortKey::Pareto(Metric::TestError)),
        keep,
        unique,
    )
    .into_vec()
}

fn rank(report: &ExprReport) -> f64 {
    let err = report.test_error();
    if err.is_nan() { f64::INFINITY } else { err }
}

fn progress(slots: &[WorkerSlot], best: &[ExprReport], names: &[String]) -> RunProgress {
    RunProgress {
        iteration: slots.first().map_or(0, |s| s.generation),
        best_error: best.first().map_or(f64::NAN, |r| r.test_error()),
        best: best.first().map(|r| r.pretty(names)),
        best_count: best.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::expr::Expr;
    use crate::compute::search::Scores;
    use crate::schema::{Point, PointSet, Problem, SearchConfig, TreeConfig};

    fn report(expr: Expr, coeff: Vec<f64>, error: f64) -> ExprReport {
        let mut e = expr;
        e.index_coefficients();
        let scores = Scores {
            test_error: error,
            ..Scores::default()
        };
        ExprReport::new(e, coeff, scores)
    }

    fn run_config(searches: usize, max_iterations: usize) -> RunConfig {
        let f = |x: f64| 2.0 * x * x + 1.0;
        let set = |n: usize| {
            PointSet::new(
                (0..n)
                    .map(|i| {
                        let x = -1.0 + 2.0 * i as f64 / n as f64;
                        Point::new(vec![x], f(x))
                    })
                    .collect(),
            )
        };
        let search = SearchConfig {
            tree: TreeConfig {
                max_size: 8,
                max_height: 4,
                ..TreeConfig::default()
            },
            eval_workers: 2,
            ..SearchConfig::default()
        };
        let mut config = RunConfig {
            problem: Problem::new(set(30), set(12)),
            searches: vec![search; searches],
            coordinator: Default::default(),
        };
        config.coordinator.max_iterations = max_iterations;
        config
    }

    #[test]
    fn test_merge_drops_near_duplicates() {
        // Same form from two workers, one with a literal instead of a coefficient
        let a = report(Expr::scaled(Expr::var(0)), vec![2.0], 0.5);
        let b = report(Expr::Mul(vec![Expr::Literal(2.0), Expr::var(0)]), vec![], 0.1);
        let c = report(Expr::var(0), vec![], 0.3);

        let merged = merge_reports(&[a], [&b, &c], 32);
        assert_eq!(merged.len(), 2);
        // x0 is smaller, the literal form is more accurate: both on the front
        assert_eq!(merged[0].test_error(), 0.3);
        assert_eq!(merged[1].test_error(), 0.1);
    }

    #[test]
    fn test_merge_keeps_best_count() {
        let reports: Vec<ExprReport> = (0..10)
            .map(|i| {
                let factors = (0..=i).map(Expr::var).collect();
                report(Expr::Mul(factors), vec![], 1.0 / (i + 1) as f64)
            })
            .collect();
        let merged = merge_reports(&[], reports.iter(), 4);
        assert_eq!(merged.len(), 4);
        assert!(merged.iter().all(|r| r.test_error().is_finite()));
    }

    #[test]
    fn test_merge_is_stable_under_repetition() {
        let a = report(Expr::scaled(Expr::var(0)), vec![2.0], 0.5);
        let once = merge_reports(&[], [&a], 32);
        let twice = merge_reports(&once, [&a], 32);
        assert_eq!(once.len(), 1);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_run_stops_after_max_iterations() {
        let coordinator = Coordinator::new(run_config(2, 2)).unwrap();
        let mut calls = 0;
        let result = coordinator.run_with_callback(|_| calls += 1).unwrap();

        assert!(calls > 0);
        assert_eq!(result.stop_reason, StopReason::MaxIterations);
        assert!(result.iterations > 2);
        assert_eq!(result.stats.len(), 2);
        assert!(!result.best.is_empty());
        assert!(result.best.len() <= 32);
        for (i, a) in result.best.iter().enumerate() {
            for b in &result.best[i + 1..] {
                assert!(!a.expr().is_almost_same(b.expr()));
            }
        }
    }

    #[test]
    fn test_run_ends_when_workers_finish() {
        let mut config = run_config(1, 1000);
        config.searches[0].max_generations = Some(2);
        let result = Coordinator::new(config).unwrap().run().unwrap();
        assert_eq!(result.stop_reason, StopReason::WorkersFinished);
        assert_eq!(result.stats[0].generations, 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = run_config(1, 2);
        config.searches.clear();
        assert!(matches!(
            Coordinator::new(config),
            Err(ConfigError::NoSearches)
        ));
    }
}
