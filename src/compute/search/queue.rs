//! Ordered, bounded archive of fitted candidates.
//!
//! A [`ReportQueue`] keeps its reports in a `Vec` ordered by a swappable
//! [`Order`]. Pushes and pops work at the back, so the [`Ranking`] decides what
//! `pop` yields: working queues keep the best candidate last, report archives
//! keep it first.
//!
//! # Orders
//!
//! An order combines a [`SortKey`] (25 shapes over size and the six metrics)
//! with a [`Ranking`], for 50 distinct orders. Every comparison ends with the
//! expression's structural order so equal scores always rank the same way.
//!
//! Pareto keys rank by non-dominated layering: the first front (candidates no
//! other candidate beats on both size and metric) comes first, smallest size
//! first, then the front of what remains, and so on.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::ExprReport;
use crate::schema::{Metric, SortKey};

/// Where the best candidate lives in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ranking {
    /// Index 0 holds the best candidate (report archives).
    BestFirst,
    /// The back holds the best candidate, so `pop` yields it (working queues).
    BestLast,
}

impl Ranking {
    pub fn flipped(self) -> Self {
        match self {
            Self::BestFirst => Self::BestLast,
            Self::BestLast => Self::BestFirst,
        }
    }
}

/// A complete archive order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    pub key: SortKey,
    pub ranking: Ranking,
}

impl Order {
    pub fn best_first(key: SortKey) -> Self {
        Self {
            key,
            ranking: Ranking::BestFirst,
        }
    }

    pub fn best_last(key: SortKey) -> Self {
        Self {
            key,
            ranking: Ranking::BestLast,
        }
    }

    /// All 50 orders.
    pub fn all() -> Vec<Order> {
        SortKey::all()
            .into_iter()
            .flat_map(|key| [Self::best_first(key), Self::best_last(key)])
            .collect()
    }
}

/// Metric value mapped so that smaller is better and NaN is worst.
#[inline]
fn rank_value(r: &ExprReport, metric: Metric) -> f64 {
    let v = r.metric(metric);
    if v.is_nan() {
        f64::INFINITY
    } else if metric.lower_is_better() {
        v
    } else {
        -v
    }
}

#[inline]
fn cmp_metric(a: &ExprReport, b: &ExprReport, metric: Metric) -> Ordering {
    rank_value(a, metric).total_cmp(&rank_value(b, metric))
}

/// `Less` when `a` ranks better than `b`.
///
/// Pareto keys fall back to metric-then-size for pairwise decisions (capacity
/// eviction); whole-archive ranking under them uses front layering.
pub fn compare(key: SortKey, a: &ExprReport, b: &ExprReport) -> Ordering {
    let primary = match key {
        SortKey::Size => a.size().cmp(&b.size()),
        SortKey::Metric(m) => cmp_metric(a, b, m),
        SortKey::SizeThen(m) => a.size().cmp(&b.size()).then_with(|| cmp_metric(a, b, m)),
        SortKey::ThenSize(m) | SortKey::Pareto(m) => {
            cmp_metric(a, b, m).then_with(|| a.size().cmp(&b.size()))
        }
    };
    primary.then_with(|| a.expr().cmp_structure(b.expr()))
}

/// Split a size-then-metric sorted list into its first front and the rest.
///
/// A candidate joins the front when its metric strictly improves on every
/// candidate before it; the first candidate always does.
fn split_front(sorted: Vec<ExprReport>, metric: Metric) -> (Vec<ExprReport>, Vec<ExprReport>) {
    let mut front = Vec::new();
    let mut rest = Vec::new();
    let mut best: Option<f64> = None;
    for r in sorted {
        let v = rank_value(&r, metric);
        match best {
            Some(b) if v >= b => rest.push(r),
            _ => {
                best = Some(v);
                front.push(r);
            }
        }
    }
    (front, rest)
}

/// Best-first Pareto layering.
fn pareto_layers(mut items: Vec<ExprReport>, metric: Metric) -> Vec<ExprReport> {
    items.sort_by(|a, b| compare(SortKey::SizeThen(metric), a, b));
    let mut out = Vec::with_capacity(items.len());
    let mut remaining = items;
    while !remaining.is_empty() {
        // `rest` keeps the size-then-metric order, so no re-sort is needed
        let (front, rest) = split_front(remaining, metric);
        out.extend(front);
        remaining = rest;
    }
    out
}

/// Bounded archive of fitted candidates.
#[derive(Debug, Clone)]
pub struct ReportQueue {
    items: Vec<ExprReport>,
    order: Order,
    capacity: usize,
    sorted: bool,
}

impl ReportQueue {
    pub fn new(order: Order, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.min(1024)),
            order,
            capacity: capacity.max(1),
            sorted: true,
        }
    }

    /// Build from existing reports, sorted and truncated to capacity.
    pub fn from_vec(order: Order, capacity: usize, items: Vec<ExprReport>) -> Self {
        let mut queue = Self::new(order, capacity);
        queue.items = items;
        queue.sorted = false;
        queue.sort();
        let excess = queue.items.len().saturating_sub(queue.capacity);
        match order.ranking {
            Ranking::BestFirst => queue.items.truncate(queue.capacity),
            Ranking::BestLast => {
                queue.items.drain(..excess);
            }
        }
        queue
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn order(&self) -> Order {
        self.order
    }

    /// Change the order. Storage is re-sorted lazily.
    pub fn set_order(&mut self, order: Order) {
        if order != self.order {
            self.order = order;
            self.sorted = false;
        }
    }

    /// Sort storage under the current order.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let items = std::mem::take(&mut self.items);
        let mut ranked = match self.order.key {
            SortKey::Pareto(metric) => pareto_layers(items, metric),
            key => {
                let mut items = items;
                items.sort_by(|a, b| compare(key, a, b));
                items
            }
        };
        if self.order.ranking == Ranking::BestLast {
            ranked.reverse();
        }
        self.items = ranked;
        self.sorted = true;
    }

    /// Reverse storage, flipping the ranking so the order stays consistent.
    pub fn reverse(&mut self) {
        self.items.reverse();
        self.order.ranking = self.order.ranking.flipped();
    }

    /// Insert a report, enforcing capacity.
    ///
    /// When full, the lowest-ranked report is evicted if the newcomer outranks
    /// it; otherwise the newcomer is rejected. Returns whether it was kept.
    pub fn push(&mut self, report: ExprReport) -> bool {
        if self.items.len() < self.capacity {
            self.items.push(report);
            self.sorted = false;
            return true;
        }

        self.sort();
        let worst = match self.order.ranking {
            Ranking::BestFirst => self.items.len() - 1,
            Ranking::BestLast => 0,
        };
        if compare(self.order.key, &report, &self.items[worst]) != Ordering::Less {
            return false;
        }
        self.items.remove(worst);
        self.items.push(report);
        self.sorted = false;
        true
    }

    /// Remove the report at the back of storage: the best one for
    /// [`Ranking::BestLast`] queues. `None` when empty.
    pub fn pop(&mut self) -> Option<ExprReport> {
        self.sort();
        self.items.pop()
    }

    /// Keep only the first Pareto front under `metric`, returning the
    /// dominated reports.
    ///
    /// Running it again on the result returns nothing.
    pub fn pareto_extract(&mut self, metric: Metric) -> Vec<ExprReport> {
        let mut items = std::mem::take(&mut self.items);
        items.sort_by(|a, b| compare(SortKey::SizeThen(metric), a, b));
        let (front, dominated) = split_front(items, metric);
        self.items = front;
        self.sorted = false;
        self.sort();
        dominated
    }

    /// Reports from best to worst.
    pub fn iter_ranked(&mut self) -> Box<dyn Iterator<Item = &ExprReport> + '_> {
        self.sort();
        match self.order.ranking {
            Ranking::BestFirst => Box::new(self.items.iter()),
            Ranking::BestLast => Box::new(self.items.iter().rev()),
        }
    }

    /// Clones of the best `k` reports, best first.
    pub fn top(&mut self, k: usize) -> Vec<ExprReport> {
        self.iter_ranked().take(k).cloned().collect()
    }

    /// Storage order, without sorting.
    pub fn iter(&self) -> std::slice::Iter<'_, ExprReport> {
        self.items.iter()
    }

    /// All reports, best first.
    pub fn into_vec(mut self) -> Vec<ExprReport> {
        self.sort();
        if self.order.ranking == Ranking::BestLast {
            self.items.reverse();
        }
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::expr::Expr;
    use crate::compute::search::Scores;
    use proptest::prelude::*;

    /// A report of exactly `size` structural nodes with the given scores.
    fn report(size: usize, error: f64, hits: usize) -> ExprReport {
        let expr = if size == 1 {
            Expr::var(0)
        } else {
            Expr::Mul((0..size - 1).map(Expr::var).collect())
        };
        let scores = Scores {
            train_error: error,
            test_error: error,
            pred_error: error,
            train_hits: hits,
            test_hits: hits,
            pred_hits: hits,
            ..Scores::default()
        };
        ExprReport::new(expr, Vec::new(), scores)
    }

    fn key(r: &ExprReport) -> (usize, f64) {
        (r.size(), r.test_error())
    }

    #[test]
    fn test_best_last_pops_best() {
        let mut q = ReportQueue::new(Order::best_last(SortKey::Metric(Metric::TestError)), 16);
        q.push(report(1, 0.5, 0));
        q.push(report(1, 0.1, 0));
        q.push(report(1, 0.9, 0));
        assert_eq!(q.pop().map(|r| r.test_error()), Some(0.1));
        assert_eq!(q.pop().map(|r| r.test_error()), Some(0.5));
        assert_eq!(q.pop().map(|r| r.test_error()), Some(0.9));
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_nan_ranks_last() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Metric(Metric::TestError)), 16);
        q.push(report(1, f64::NAN, 0));
        q.push(report(1, 3.0, 0));
        let ranked: Vec<f64> = q.iter_ranked().map(|r| r.test_error()).collect();
        assert_eq!(ranked[0], 3.0);
        assert!(ranked[1].is_nan());
    }

    #[test]
    fn test_hits_rank_high_first() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Metric(Metric::TestHits)), 16);
        q.push(report(1, 0.0, 2));
        q.push(report(1, 0.0, 9));
        assert_eq!(q.top(1)[0].scores().test_hits, 9);
    }

    #[test]
    fn test_size_then_metric() {
        let mut q = ReportQueue::new(
            Order::best_first(SortKey::SizeThen(Metric::TestError)),
            16,
        );
        q.push(report(3, 0.1, 0));
        q.push(report(1, 0.9, 0));
        q.push(report(1, 0.2, 0));
        let ranked: Vec<_> = q.iter_ranked().map(key).collect();
        assert_eq!(ranked, vec![(1, 0.2), (1, 0.9), (3, 0.1)]);
    }

    #[test]
    fn test_pareto_layering() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Pareto(Metric::TestError)), 16);
        for (size, err) in [(1, 0.9), (2, 0.5), (3, 0.6), (4, 0.1), (2, 0.7)] {
            q.push(report(size, err, 0));
        }
        let ranked: Vec<_> = q.iter_ranked().map(key).collect();
        assert_eq!(
            ranked,
            vec![(1, 0.9), (2, 0.5), (4, 0.1), (2, 0.7), (3, 0.6)]
        );
    }

    #[test]
    fn test_pareto_extract() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Pareto(Metric::TestError)), 16);
        for (size, err) in [(1, 0.9), (2, 0.5), (3, 0.6), (4, 0.1), (2, 0.7)] {
            q.push(report(size, err, 0));
        }
        let dominated = q.pareto_extract(Metric::TestError);
        assert_eq!(dominated.len(), 2);
        let front: Vec<_> = q.iter_ranked().map(key).collect();
        assert_eq!(front, vec![(1, 0.9), (2, 0.5), (4, 0.1)]);
        assert!(q.pareto_extract(Metric::TestError).is_empty());
    }

    #[test]
    fn test_capacity_evicts_lowest_ranked() {
        let mut q = ReportQueue::new(Order::best_last(SortKey::Metric(Metric::TestError)), 2);
        assert!(q.push(report(1, 0.5, 0)));
        assert!(q.push(report(1, 0.7, 0)));
        assert!(!q.push(report(1, 0.9, 0)));
        assert!(q.push(report(1, 0.1, 0)));
        assert_eq!(q.len(), 2);
        let ranked: Vec<f64> = q.iter_ranked().map(|r| r.test_error()).collect();
        assert_eq!(ranked, vec![0.1, 0.5]);
    }

    #[test]
    fn test_reverse_keeps_ranking() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Metric(Metric::TestError)), 8);
        q.push(report(1, 0.3, 0));
        q.push(report(1, 0.1, 0));
        q.sort();
        q.reverse();
        assert_eq!(q.order().ranking, Ranking::BestLast);
        assert_eq!(q.pop().map(|r| r.test_error()), Some(0.1));
    }

    #[test]
    fn test_set_order_resorts() {
        let mut q = ReportQueue::new(Order::best_first(SortKey::Size), 8);
        q.push(report(3, 0.1, 0));
        q.push(report(1, 0.9, 0));
        assert_eq!(q.top(1)[0].size(), 1);
        q.set_order(Order::best_first(SortKey::Metric(Metric::TestError)));
        assert_eq!(q.top(1)[0].size(), 3);
    }

    #[test]
    fn test_from_vec_truncates_worst() {
        let items = vec![report(1, 0.3, 0), report(1, 0.1, 0), report(1, 0.2, 0)];
        let q = ReportQueue::from_vec(Order::best_last(SortKey::Metric(Metric::TestError)), 2, items);
        let ranked: Vec<f64> = q.into_vec().iter().map(|r| r.test_error()).collect();
        assert_eq!(ranked, vec![0.1, 0.2]);
    }

    #[test]
    fn test_fifty_orders() {
        let orders = Order::all();
        assert_eq!(orders.len(), 50);
        let distinct: std::collections::HashSet<_> = orders.into_iter().collect();
        assert_eq!(distinct.len(), 50);
    }

    fn arb_reports() -> impl Strategy<Value = Vec<ExprReport>> {
        prop::collection::vec((1usize..6, 0u8..20, 0usize..5), 0..30).prop_map(|v| {
            v.into_iter()
                .map(|(size, err, hits)| report(size, err as f64 / 10.0, hits))
                .collect()
        })
    }

    fn dominates(a: &ExprReport, b: &ExprReport, metric: Metric) -> bool {
        let (va, vb) = (rank_value(a, metric), rank_value(b, metric));
        a.size() <= b.size() && va <= vb && (a.size() < b.size() || va < vb)
    }

    proptest! {
        #[test]
        fn prop_pop_order_is_monotone(reports in arb_reports(), which in 0usize..25) {
            let key = SortKey::all()[which];
            let mut q = ReportQueue::new(Order::best_last(key), 64);
            for r in reports {
                q.push(r);
            }
            let mut popped = Vec::new();
            while let Some(r) = q.pop() {
                popped.push(r);
            }
            for (i, earlier) in popped.iter().enumerate() {
                for later in &popped[i + 1..] {
                    match key {
                        SortKey::Pareto(m) => prop_assert!(!dominates(later, earlier, m)),
                        _ => prop_assert_ne!(compare(key, earlier, later), Ordering::Greater),
                    }
                }
            }
        }

        #[test]
        fn prop_pareto_extract_is_idempotent(reports in arb_reports(), which in 0usize..6) {
            let metric = Metric::ALL[which];
            let mut q = ReportQueue::new(Order::best_first(SortKey::Pareto(metric)), 64);
            for r in reports {
                q.push(r);
            }
            q.pareto_extract(metric);
            let before: Vec<_> = q.iter_ranked().map(|r| (r.size(), r.metric(metric))).collect();
            prop_assert!(q.pareto_extract(metric).is_empty());
            let after: Vec<_> = q.iter_ranked().map(|r| (r.size(), r.metric(metric))).collect();
            prop_assert_eq!(before, after);
        }
    }
}
