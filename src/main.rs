//! PGE CLI - Run symbolic regression searches from JSON configuration.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rand::Rng;

use pge::{
    compute::search::{Coordinator, RunResult},
    schema::{Point, PointSet, Problem, RunConfig, SearchConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [result.json]", args[0]);
        eprintln!();
        eprintln!("Run a Prioritized Grammar Enumeration search from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!("  result.json  Where to write the final best-set (optional)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let output_path = args.get(2).map(PathBuf::from);

    let config = RunConfig::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    println!("PGE Search");
    println!("==========");
    println!(
        "Variables: {} ({})",
        config.problem.num_vars(),
        config.problem.names().join(", ")
    );
    println!(
        "Points: {} train, {} test",
        config.problem.train.iter().map(PointSet::len).sum::<usize>(),
        config.problem.test.iter().map(PointSet::len).sum::<usize>()
    );
    println!("Searches: {}", config.searches.len());
    println!("Max iterations: {}", config.coordinator.max_iterations);
    println!();

    let coordinator = Coordinator::new(config).unwrap_or_else(|e| {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    println!("Running search...");
    let start = Instant::now();
    let mut last_iteration = usize::MAX;
    let result = coordinator
        .run_with_callback(|progress| {
            if progress.iteration != last_iteration {
                last_iteration = progress.iteration;
                println!(
                    "  Iteration {}: best error={:.6e}, {} in best set, {:.1}s",
                    progress.iteration,
                    progress.best_error,
                    progress.best_count,
                    start.elapsed().as_secs_f32()
                );
            }
        })
        .unwrap_or_else(|e| {
            eprintln!("Search failed: {}", e);
            std::process::exit(1);
        });

    print_result(&result);

    if let Some(path) = output_path {
        let json = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
            eprintln!("Error serializing result: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = fs::write(&path, json) {
            eprintln!("Error writing {}: {}", path.display(), e);
            std::process::exit(1);
        }
        println!("Result written to {}", path.display());
    }
}

fn print_result(result: &RunResult) {
    println!();
    println!(
        "Stopped ({:?}) after {} iterations in {:.2}s",
        result.stop_reason, result.iterations, result.elapsed_seconds
    );
    for stats in &result.stats {
        println!(
            "  Worker {}: {} generations, {} evaluations, {} unique forms",
            stats.worker, stats.generations, stats.evaluations, stats.trie_unique
        );
    }
    println!();
    println!("Best expressions:");
    for (i, report) in result.best.iter().enumerate() {
        println!(
            "  {:>2}. size={:<3} test={:.6e} hits={:<4} {}",
            i + 1,
            report.size(),
            report.test_error(),
            report.scores().test_hits,
            report.pretty(&result.var_names)
        );
    }
}

/// A two-variable problem sampled from `1.5*x*y + sin(x)`.
fn example_problem() -> Problem {
    let mut rng = rand::thread_rng();
    let mut sample = |n: usize| {
        let points = (0..n)
            .map(|_| {
                let x: f64 = rng.gen_range(-2.0..2.0);
                let y: f64 = rng.gen_range(-2.0..2.0);
                Point::new(vec![x, y], 1.5 * x * y + x.sin())
            })
            .collect();
        PointSet::new(points)
    };
    let train = sample(200);
    let test = sample(50);
    let mut problem = Problem::new(train, test);
    problem.var_names = vec!["x".into(), "y".into()];
    problem
}

fn print_example_config() {
    let mut search = SearchConfig::default();
    search.tree.nodes = vec!["sin".into(), "cos".into(), "exp".into()];

    let config = RunConfig {
        problem: example_problem(),
        searches: vec![search],
        coordinator: Default::default(),
    };

    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing example: {}", e);
            std::process::exit(1);
        }
    }
}
