// src/bin/mg_decomp_check.rs
//
// Run the same problem on several worker counts and compare the residual histories.
// The stencil kernels are decomposition-independent, so the only differences allowed are
// the last-bit effects of summing the norm in a different order.
//
// Usage:
//   cargo run --release --bin mg_decomp_check
//   cargo run --release --bin mg_decomp_check -- S 1 2 4 8 16
//   cargo run --release --bin mg_decomp_check -- W 1 8 64
//
// The first argument is the class (default S); the rest are worker counts
// (default 1 2 4 8 16). Exit status is 1 if any pair differs by more than 1e-9 relative.

use std::process::ExitCode;
use std::time::Instant;

use npb_mg::{MgConfig, ProblemClass, run_benchmark};

const TOLERANCE: f64 = 1e-9;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let class = match args.first().map(|s| s.parse::<ProblemClass>()) {
        None => ProblemClass::S,
        Some(Ok(c)) => c,
        Some(Err(e)) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let mut workers: Vec<usize> = args.iter().skip(1).filter_map(|s| s.parse().ok()).collect();
    if workers.is_empty() {
        workers = vec![1, 2, 4, 8, 16];
    }

    println!(
        "class {class}: {0}^3, nit = {1}, lt = {2}",
        class.grid_extent(),
        class.iterations(),
        class.levels()
    );
    println!(
        "{:>8} {:>10} {:>22} {:>12} {:>10} {:>12}",
        "workers", "grid", "final l2", "rel. diff", "agglom.", "time (s)"
    );

    let mut baseline: Option<Vec<f64>> = None;
    let mut ok = true;
    for &w in &workers {
        let mut cfg = MgConfig::for_class(class);
        cfg.workers = w;
        cfg.warmup = 0;

        let t0 = Instant::now();
        let report = match run_benchmark(&cfg) {
            Ok(r) => r,
            Err(e) => {
                println!("{w:>8}  skipped: {e}");
                continue;
            }
        };
        let wall = t0.elapsed().as_secs_f64();

        let norms: Vec<f64> = report.history.iter().map(|(_, n)| n.l2).collect();
        let diff = match &baseline {
            None => {
                baseline = Some(norms.clone());
                0.0
            }
            Some(base) => base
                .iter()
                .zip(&norms)
                .map(|(a, b)| ((a - b) / a).abs())
                .fold(0.0, f64::max),
        };
        if diff > TOLERANCE {
            ok = false;
        }

        let g = report.process_grid;
        let agglomerated = report.first_distributed - 1;
        println!(
            "{:>8} {:>10} {:>22.15e} {:>12.3e} {:>10} {:>12.3}",
            w,
            format!("{}x{}x{}", g[0], g[1], g[2]),
            report.final_norm.l2,
            diff,
            agglomerated,
            wall
        );
    }

    if ok {
        println!("all decompositions agree within {TOLERANCE:e}");
        ExitCode::SUCCESS
    } else {
        println!("decompositions DISAGREE beyond {TOLERANCE:e}");
        ExitCode::FAILURE
    }
}
