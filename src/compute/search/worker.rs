//! Search worker.
//!
//! A [`PgeSearch`] owns one grammar, one dedup trie, a live queue of fitted
//! candidates ordered best-last and a best archive ordered best-first. Each
//! generation peels the best few candidates off the live queue, expands
//! them, filters the children through the grammar and the trie, fits the
//! survivors on a private evaluator pool and pushes the results back.
//!
//! Workers talk to the coordinator over crossbeam channels only; see
//! [`link`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, unbounded};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{DedupTrie, Expander, ExprReport, Grammar, Order, ReportId, ReportQueue, SearchError};
use crate::compute::expr::Expr;
use crate::compute::fit::regress;
use crate::schema::{FitConfig, Problem, SearchConfig};

// ============================================================================
// Messages
// ============================================================================

/// Coordinator to worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
}

/// Sent after every generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub worker: usize,
    pub generation: usize,
}

/// A worker's current best set.
#[derive(Debug, Clone)]
pub struct ReportBatch {
    pub worker: usize,
    pub generation: usize,
    pub reports: Vec<ExprReport>,
    /// Sent after the live queue was drained.
    pub last: bool,
}

/// Worker end of the coordinator channels.
#[derive(Debug)]
pub struct WorkerLink {
    commands: Receiver<Command>,
    reports: Sender<ReportBatch>,
    progress: Sender<Progress>,
    acks: Sender<usize>,
}

/// Coordinator end of the coordinator channels.
#[derive(Debug)]
pub struct CoordinatorLink {
    pub commands: Sender<Command>,
    pub reports: Receiver<ReportBatch>,
    pub progress: Receiver<Progress>,
    /// Receives the worker id exactly once, when the worker has stopped.
    pub acks: Receiver<usize>,
}

/// Create the channel pair for one worker.
///
/// Reports and progress are bounded by `capacity`; a worker blocks when the
/// coordinator falls behind. Commands and acknowledgements never block.
pub fn link(capacity: usize) -> (CoordinatorLink, WorkerLink) {
    let (cmd_tx, cmd_rx) = unbounded();
    let (rpt_tx, rpt_rx) = bounded(capacity);
    let (gen_tx, gen_rx) = bounded(capacity);
    let (ack_tx, ack_rx) = unbounded();
    (
        CoordinatorLink {
            commands: cmd_tx,
            reports: rpt_rx,
            progress: gen_rx,
            acks: ack_rx,
        },
        WorkerLink {
            commands: cmd_rx,
            reports: rpt_tx,
            progress: gen_tx,
            acks: ack_tx,
        },
    )
}

// ============================================================================
// Evaluator pool
// ============================================================================

/// Fixed set of fitting threads behind a bounded input queue.
struct EvalPool {
    input: Sender<Expr>,
    output: Receiver<ExprReport>,
    handles: Vec<JoinHandle<()>>,
}

impl EvalPool {
    fn spawn(
        worker: usize,
        threads: usize,
        capacity: usize,
        problem: Arc<Problem>,
        fit: FitConfig,
    ) -> Result<Self, SearchError> {
        let (in_tx, in_rx) = bounded::<Expr>(capacity);
        let (out_tx, out_rx) = bounded::<ExprReport>(capacity);

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = in_rx.clone();
            let tx = out_tx.clone();
            let problem = Arc::clone(&problem);
            let fit = fit.clone();
            let handle = thread::Builder::new()
                .name(format!("pge-{worker}-eval-{i}"))
                .spawn(move || {
                    for expr in rx.iter() {
                        if tx.send(regress(&expr, &problem, &fit)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(SearchError::Spawn)?;
            handles.push(handle);
        }

        Ok(Self {
            input: in_tx,
            output: out_rx,
            handles,
        })
    }

    /// Fit every expression and collect exactly one result per dispatch.
    ///
    /// Whenever the input queue is full a result is collected first, so the
    /// pool never stalls on a full output queue.
    fn evaluate(&self, exprs: Vec<Expr>) -> Vec<ExprReport> {
        let mut results = Vec::with_capacity(exprs.len());
        let mut dispatched = 0;

        for expr in exprs {
            let mut pending = expr;
            loop {
                match self.input.try_send(pending) {
                    Ok(()) => {
                        dispatched += 1;
                        break;
                    }
                    Err(TrySendError::Full(back)) => {
                        pending = back;
                        match self.output.recv() {
                            Ok(report) => results.push(report),
                            Err(_) => return results,
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => return results,
                }
            }
        }

        while results.len() < dispatched {
            match self.output.recv() {
                Ok(report) => results.push(report),
                Err(_) => break,
            }
        }
        results
    }

    fn shutdown(self) {
        drop(self.input);
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("Evaluator thread panicked");
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Initialized,
    Running,
    Draining,
    Stopped,
}

/// Counters reported when a worker stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub worker: usize,
    pub generations: usize,
    /// Expressions sent to the evaluator pool (initial candidates included).
    pub dispatched: usize,
    /// Fitted results collected back.
    pub evaluations: usize,
    /// Results discarded for a non-finite error or a zero coefficient.
    pub rejected: usize,
    pub trie_unique: usize,
    pub trie_visits: usize,
    pub best_count: usize,
    pub min_error: f64,
    pub max_size: usize,
    pub max_hits: usize,
}

impl SearchStats {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            generations: 0,
            dispatched: 0,
            evaluations: 0,
            rejected: 0,
            trie_unique: 0,
            trie_visits: 0,
            best_count: 0,
            min_error: f64::INFINITY,
            max_size: 0,
            max_hits: 0,
        }
    }
}

/// One independent search.
pub struct PgeSearch {
    id: usize,
    config: SearchConfig,
    problem: Arc<Problem>,
    names: Vec<String>,
    expander: Expander,
    trie: DedupTrie,
    queue: ReportQueue,
    best: ReportQueue,
    pool: Option<EvalPool>,
    state: SearchState,
    generation: usize,
    next_unique: usize,
    stats: SearchStats,
}

impl PgeSearch {
    /// Build the worker, start its evaluator pool and seed the live queue.
    pub fn new(id: usize, config: SearchConfig, problem: Arc<Problem>) -> Result<Self, SearchError> {
        config.validate(&problem)?;
        let grammar = Grammar::new(&config.tree, problem.num_vars())?;
        let expander = Expander::new(
            grammar,
            config.grow_method,
            config.simplify,
            config.max_basis_factors,
        );
        let pool = EvalPool::spawn(
            id,
            config.eval_workers,
            config.eval_queue_capacity,
            Arc::clone(&problem),
            config.fit.clone(),
        )?;

        let mut search = Self {
            id,
            names: problem.names(),
            queue: ReportQueue::new(Order::best_last(config.queue_order), config.archive_capacity),
            best: ReportQueue::new(Order::best_first(config.best_order), config.archive_capacity),
            expander,
            trie: DedupTrie::new(),
            pool: Some(pool),
            state: SearchState::Initialized,
            generation: 0,
            next_unique: 0,
            stats: SearchStats::new(id),
            problem,
            config,
        };
        search.seed();
        Ok(search)
    }

    /// Fit the initial candidates in parallel and queue the usable ones.
    fn seed(&mut self) {
        let initial: Vec<Expr> = self
            .expander
            .initial(self.config.init_method)
            .into_iter()
            .filter(|e| self.trie.insert(&e.to_serial()))
            .collect();

        let problem = &self.problem;
        let fit = &self.config.fit;
        let reports: Vec<ExprReport> = initial.par_iter().map(|e| regress(e, problem, fit)).collect();

        self.stats.dispatched += reports.len();
        self.stats.evaluations += reports.len();
        for report in &reports {
            trace!("Worker {} seed: {}", self.id, report.pretty(&self.names));
        }
        let admitted = self.admit(reports);
        self.queue.sort();
        info!(
            "Worker {}: seeded {} of {} candidates",
            self.id,
            admitted,
            initial.len()
        );
    }

    fn next_id(&mut self, unit: usize) -> ReportId {
        let id = ReportId {
            unique: self.next_unique,
            worker: self.id,
            generation: self.generation,
            unit,
        };
        self.next_unique += 1;
        id
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn expander(&self) -> &Expander {
        &self.expander
    }

    pub fn trie(&self) -> &DedupTrie {
        &self.trie
    }

    /// Live queue (best last).
    pub fn queue(&self) -> &ReportQueue {
        &self.queue
    }

    /// Best archive (best first).
    pub fn best(&self) -> &ReportQueue {
        &self.best
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            generations: self.generation,
            trie_unique: self.trie.unique(),
            trie_visits: self.trie.visits(),
            best_count: self.best.len(),
            ..self.stats.clone()
        }
    }

    /// Run generations until stopped, then drain and acknowledge.
    ///
    /// The loop ends on a [`Command::Stop`], a disconnected coordinator or
    /// after `max_generations`. The acknowledgement is sent exactly once in
    /// every case.
    pub fn run(mut self, link: WorkerLink) -> SearchStats {
        self.state = SearchState::Running;
        info!("Worker {} running", self.id);

        loop {
            if self.stop_requested(&link) {
                debug!("Worker {} received stop at generation {}", self.id, self.generation);
                break;
            }
            if let Some(max) = self.config.max_generations
                && self.generation >= max
            {
                debug!("Worker {} reached {} generations", self.id, max);
                break;
            }

            let admitted = self.step();
            trace!("Worker {} generation {}: {} admitted", self.id, self.generation, admitted);

            if self.generation % self.config.report_epoch == 0 && !self.report(&link, false) {
                break;
            }
            let progress = Progress {
                worker: self.id,
                generation: self.generation,
            };
            if link.progress.send(progress).is_err() {
                break;
            }
            self.generation += 1;
        }

        self.drain();
        self.report(&link, true);
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        self.state = SearchState::Stopped;

        let stats = self.stats();
        info!(
            "Worker {} stopped after {} generations: {} evaluations, {} unique forms",
            self.id, stats.generations, stats.evaluations, stats.trie_unique
        );
        if link.acks.send(self.id).is_err() {
            debug!("Worker {}: coordinator gone before acknowledgement", self.id);
        }
        stats
    }

    fn stop_requested(&self, link: &WorkerLink) -> bool {
        match link.commands.try_recv() {
            Ok(Command::Stop) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }

    /// One generation: peel, expand, filter, fit and requeue.
    ///
    /// Returns the number of fitted children admitted to the live queue.
    pub fn step(&mut self) -> usize {
        let peeled = self.peel();

        let mut children = Vec::new();
        for report in &peeled {
            let seed = match report.expr() {
                e @ Expr::Add(_) => e.clone(),
                other => Expr::Add(vec![other.clone()]),
            };
            for child in self.expander.expand(&seed) {
                if self.expander.grammar().is_valid(&child) && self.trie.insert(&child.to_serial()) {
                    children.push(child);
                }
            }
        }

        let dispatched = children.len();
        let results = match &self.pool {
            Some(pool) => pool.evaluate(children),
            None => Vec::new(),
        };
        self.stats.dispatched += dispatched;
        self.stats.evaluations += results.len();

        let admitted = self.admit(results);
        self.queue.sort();
        admitted
    }

    /// Stamp and queue fitted candidates, discarding degenerate fits.
    fn admit(&mut self, results: Vec<ExprReport>) -> usize {
        let eps = self.config.zero_epsilon;
        let mut unit = 0;
        for mut report in results {
            let err = report.test_error();
            if !err.is_finite() || report.has_zero_coeff(eps) {
                self.stats.rejected += 1;
                continue;
            }
            self.stats.min_error = self.stats.min_error.min(err);
            report.stamp(self.next_id(unit));
            unit += 1;
            self.queue.push(report);
        }
        unit
    }

    /// Pop up to `peel_count` non-trivial candidates into the best archive.
    fn peel(&mut self) -> Vec<ExprReport> {
        let eps = self.config.zero_epsilon;
        let mut peeled = Vec::with_capacity(self.config.peel_count);
        while peeled.len() < self.config.peel_count {
            let Some(report) = self.queue.pop() else {
                break;
            };
            if report.is_trivial(eps) {
                trace!("Worker {}: skipping trivial {}", self.id, report.expr());
                continue;
            }
            debug!(
                "Worker {} peeled {:.4e} {}",
                self.id,
                report.test_error(),
                report.pretty(&self.names)
            );
            self.observe(&report);
            self.best.push(report.clone());
            peeled.push(report);
        }
        peeled
    }

    /// Move the rest of the live queue into the best archive.
    fn drain(&mut self) {
        self.state = SearchState::Draining;
        let eps = self.config.zero_epsilon;
        let mut moved = 0;
        while let Some(report) = self.queue.pop() {
            self.observe(&report);
            if report.is_trivial(eps) {
                continue;
            }
            self.best.push(report);
            moved += 1;
        }
        debug!("Worker {} drained {} candidates", self.id, moved);
    }

    fn observe(&mut self, report: &ExprReport) {
        let s = &mut self.stats;
        s.max_hits = s.max_hits.max(report.scores().test_hits);
        s.max_size = s.max_size.max(report.size());
        if report.test_error().is_finite() {
            s.min_error = s.min_error.min(report.test_error());
        }
    }

    /// Send the top of the best archive; `false` when the coordinator is gone.
    fn report(&mut self, link: &WorkerLink, last: bool) -> bool {
        let top = self.best.top(self.config.report_count);
        let errors: Vec<f64> = top
            .iter()
            .map(|r| r.test_error())
            .filter(|e| e.is_finite())
            .collect();
        let mean = if errors.is_empty() {
            f64::NAN
        } else {
            errors.iter().sum::<f64>() / errors.len() as f64
        };

        info!(
            "Worker {} gen {}: {} best, mean test error {:.6e}, min error {:.6e}, queue {}",
            self.id,
            self.generation,
            top.len(),
            mean,
            self.stats.min_error,
            self.queue.len()
        );
        debug!(
            "Worker {} trie: {} unique of {} visits, {} nodes",
            self.id,
            self.trie.unique(),
            self.trie.visits(),
            self.trie.len()
        );
        if let Some(first) = top.first() {
            debug!("Worker {} best: {}", self.id, first.pretty(&self.names));
        }

        let batch = ReportBatch {
            worker: self.id,
            generation: self.generation,
            reports: top,
            last,
        };
        link.reports.send(batch).is_ok()
    }
}

impl Drop for PgeSearch {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
