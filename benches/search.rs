//! Benchmarks for the PGE search hot paths.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use pge::{
    compute::{
        Expr, UnaryOp,
        search::{DedupTrie, Expander, ExprReport, Grammar, Order, ReportQueue, Scores},
    },
    regress,
    schema::{FitConfig, GrowMethod, Metric, Point, PointSet, Problem, SimpRules, SortKey, TreeConfig},
};

fn grammar(vars: usize) -> Grammar {
    let config = TreeConfig {
        nodes: vec!["sin".into(), "cos".into(), "exp".into(), "div".into()],
        max_size: 24,
        max_height: 6,
        ..TreeConfig::default()
    };
    Grammar::new(&config, vars).expect("valid grammar")
}

fn seed_expr() -> Expr {
    Expr::Add(vec![
        Expr::coeff(),
        Expr::scaled(Expr::var(0)),
        Expr::scaled(Expr::unary(UnaryOp::Sin, Expr::var(1))),
    ])
}

fn bench_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("expand");

    for method in [GrowMethod::Structural, GrowMethod::Basis, GrowMethod::BasisNested] {
        let expander = Expander::new(grammar(2), method, SimpRules::default(), 3);
        let seed = seed_expr();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", method)),
            &method,
            |b, _| {
                b.iter(|| expander.expand(black_box(&seed)));
            },
        );
    }

    group.finish();
}

fn bench_trie_insert(c: &mut Criterion) {
    let expander = Expander::new(grammar(2), GrowMethod::Structural, SimpRules::default(), 3);
    let serials: Vec<Vec<i32>> = expander
        .expand(&seed_expr())
        .iter()
        .map(Expr::to_serial)
        .collect();

    c.bench_function("trie_insert", |b| {
        b.iter(|| {
            let mut trie = DedupTrie::new();
            for s in &serials {
                black_box(trie.insert(s));
            }
        });
    });
}

fn bench_pareto_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("pareto_sort");

    for n in [100, 1000, 10000] {
        let reports: Vec<ExprReport> = (0..n)
            .map(|i| {
                let factors = (0..(i % 12) + 1).map(Expr::var).collect();
                let scores = Scores {
                    test_error: ((i * 7919) % 1000) as f64 / 1000.0,
                    ..Scores::default()
                };
                ExprReport::new(Expr::Mul(factors), Vec::new(), scores)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let order = Order::best_first(SortKey::Pareto(Metric::TestError));
                ReportQueue::from_vec(order, n, black_box(reports.clone())).into_vec()
            });
        });
    }

    group.finish();
}

fn bench_regress(c: &mut Criterion) {
    let set = PointSet::new(
        (0..200)
            .map(|i| {
                let x = i as f64 / 50.0;
                let y = 1.0 + (i % 17) as f64 / 17.0;
                Point::new(vec![x, y], 2.0 * x + 0.5 * y.sin() + 1.0)
            })
            .collect(),
    );
    let problem = Problem::new(set.clone(), set);
    let fit = FitConfig::default();
    let expr = seed_expr();

    c.bench_function("regress", |b| {
        b.iter(|| regress(black_box(&expr), &problem, &fit));
    });
}

criterion_group!(benches, bench_expand, bench_trie_insert, bench_pareto_sort, bench_regress);
criterion_main!(benches);
