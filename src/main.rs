// src/main.rs
//
// Command-line driver for the MG benchmark.
//
// Examples:
//
//   cargo run --release -- --class S
//       -> class S on one worker, verified against the published norm.
//
//   cargo run --release -- --class C --workers 8 --out runs/c8 --plot
//       -> class C on a 2x2x2 worker grid, writing config/report/convergence files.
//
//   cargo run --release -- --class A --grid 64 --nit 10 --lt 6 --debug-level 1
//       -> non-standard problem (reported as UNVERIFIED) with per-cycle norms logged.
//
// Every flag can also be given as an NPB_MG_* environment variable; flags win.
//
// Exit status: 0 when the benchmark ran (including a FAILED verification), 1 on any
// configuration, topology, divergence or communication error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, warn};

use npb_mg::config::{DEFAULT_OMEGA, MgConfig, parse_extents};
use npb_mg::params::ProblemClass;
use npb_mg::report::{render_report, write_outputs};
use npb_mg::stencil::StencilCoefficients;
use npb_mg::{MgResult, run_benchmark};

#[derive(Parser, Debug)]
#[command(
    name = "npb-mg",
    version,
    about = "NAS Parallel Benchmarks MG: V-cycle multigrid on a periodic 3D grid"
)]
struct Cli {
    /// Problem class (S, W, A, B, C, D, E).
    #[arg(short, long, env = "NPB_MG_CLASS", default_value = "C")]
    class: ProblemClass,

    /// Number of SPMD workers (a power of two unless --procs is given).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Explicit process grid PXxPYxPZ.
    #[arg(long, value_parser = parse_extents)]
    procs: Option<[usize; 3]>,

    /// Grid extents N or NXxNYxNZ (overrides the class size).
    #[arg(long, value_parser = parse_extents)]
    grid: Option<[usize; 3]>,

    /// Timed V-cycles.
    #[arg(long)]
    nit: Option<usize>,

    /// Hierarchy depth.
    #[arg(long)]
    lt: Option<usize>,

    /// Untimed warm-up V-cycles.
    #[arg(long)]
    warmup: Option<usize>,

    /// Smoothing sweeps per level on the way up.
    #[arg(long)]
    post_sweeps: Option<usize>,

    /// Smoothing sweeps on the coarsest level.
    #[arg(long)]
    coarse_sweeps: Option<usize>,

    /// Use the 7-point Laplacian with a weighted Jacobi smoother.
    #[arg(long)]
    seven_point: bool,

    /// Jacobi weight for --seven-point.
    #[arg(long, default_value_t = DEFAULT_OMEGA)]
    omega: f64,

    /// Divergence threshold as a multiple of the initial residual norm.
    #[arg(long)]
    divergence_factor: Option<f64>,

    /// 0: summary only, 1: per-cycle norms, 2: per-level norms inside each cycle.
    #[arg(long)]
    debug_level: Option<u32>,

    /// Directory for config.json, report.json and convergence.csv.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write convergence.svg (needs --out).
    #[arg(long)]
    plot: bool,
}

impl Cli {
    fn to_config(&self) -> MgConfig {
        let mut cfg = MgConfig::from_env(self.class);
        if let Some([nx, ny, nz]) = self.grid {
            cfg.nx = nx;
            cfg.ny = ny;
            cfg.nz = nz;
        }
        if let Some(dims) = self.procs {
            cfg.process_grid = Some(dims);
            if self.workers.is_none() {
                cfg.workers = dims.iter().product();
            }
        }
        if let Some(v) = self.workers {
            cfg.workers = v;
        }
        if let Some(v) = self.nit {
            cfg.nit = v;
        }
        if let Some(v) = self.lt {
            cfg.lt = v;
        }
        if let Some(v) = self.warmup {
            cfg.warmup = v;
        }
        if let Some(v) = self.post_sweeps {
            cfg.post_sweeps = v;
        }
        if let Some(v) = self.coarse_sweeps {
            cfg.coarse_sweeps = v;
        }
        if self.seven_point {
            cfg.coefficients = StencilCoefficients::seven_point(self.omega);
        }
        if let Some(v) = self.divergence_factor {
            cfg.divergence_factor = v;
        }
        if let Some(v) = self.debug_level {
            cfg.debug_level = v;
        }
        cfg
    }
}

fn run(cli: &Cli) -> MgResult<()> {
    if cli.plot && cli.out.is_none() {
        warn!("--plot has no effect without --out");
    }
    let cfg = cli.to_config();
    let report = run_benchmark(&cfg)?;
    print!("{}", render_report(&report));

    if let Some(dir) = &cli.out {
        write_outputs(&report, dir, cli.plot)?;
    }

    // A verification mismatch is a benchmark outcome, not a crash.
    if let Err(e) = report.verification.into_result() {
        warn!("{e}");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
