// src/driver.rs
//
// Benchmark driver.
//
// Sequence per worker:
//   1. generate the source v, u = 0, compute the residual and its norm (untimed),
//   2. warm-up V-cycles (untimed),
//   3. reset u and v,
//   4. timed: residual and initial norm, then nit x (V-cycle, residual, norm),
//   5. elapsed time is the maximum over all workers.

use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::comm::{CommStats, Communicator, run_spmd};
use crate::config::MgConfig;
use crate::error::{MgError, MgResult};
use crate::topology::DecompositionPlan;
use crate::vcycle::{CycleSettings, MultigridSolver, ResidualNorm};
use crate::verify::Verification;

/// Floating-point operations per grid point and V-cycle.
pub const FLOPS_PER_POINT: f64 = 58.0;

/// Residual norms before the first timed cycle and after each one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceHistory {
    pub initial: ResidualNorm,
    pub cycles: Vec<ResidualNorm>,
}

impl ConvergenceHistory {
    pub fn new(initial: ResidualNorm) -> Self {
        Self {
            initial,
            cycles: Vec::new(),
        }
    }

    pub fn push(&mut self, n: ResidualNorm) {
        self.cycles.push(n);
    }

    /// Norm after the last cycle (the initial norm if no cycle ran).
    pub fn final_norm(&self) -> ResidualNorm {
        self.cycles.last().copied().unwrap_or(self.initial)
    }

    /// `(cycle, norm)` pairs with cycle 0 being the initial norm.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ResidualNorm)> + '_ {
        std::iter::once(self.initial)
            .chain(self.cycles.iter().copied())
            .enumerate()
    }

    /// True when no cycle increased the L2 norm.
    pub fn is_monotone(&self) -> bool {
        let mut prev = self.initial.l2;
        for n in &self.cycles {
            if n.l2 > prev {
                return false;
            }
            prev = n.l2;
        }
        true
    }

    /// Average L2 reduction factor per cycle; `None` before the first cycle or for a zero
    /// initial residual.
    pub fn mean_rate(&self) -> Option<f64> {
        if self.cycles.is_empty() || self.initial.l2 == 0.0 {
            return None;
        }
        Some((self.final_norm().l2 / self.initial.l2).powf(1.0 / self.cycles.len() as f64))
    }
}

pub fn check_divergence(
    cycle: usize,
    norm: ResidualNorm,
    initial: ResidualNorm,
    factor: f64,
) -> MgResult<()> {
    if !norm.l2.is_finite() || norm.l2 > factor * initial.l2 {
        return Err(MgError::Divergence {
            cycle,
            norm: norm.l2,
            initial: initial.l2,
            factor,
        });
    }
    Ok(())
}

/// `58 nit nx ny nz / t`, in millions of operations per second.
pub fn mops(nit: usize, extents: [usize; 3], seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    let points = (extents[0] * extents[1] * extents[2]) as f64;
    FLOPS_PER_POINT * nit as f64 * points * 1e-6 / seconds
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub config: MgConfig,
    pub process_grid: [usize; 3],
    /// Coarsest level still split across workers; coarser ones ran on rank 0.
    pub first_distributed: usize,
    pub history: ConvergenceHistory,
    pub final_norm: ResidualNorm,
    /// No timed cycle increased the L2 norm.
    pub monotone: bool,
    pub mean_rate: Option<f64>,
    pub verification: Verification,
    /// Timed section, maximum over workers.
    pub seconds: f64,
    pub init_seconds: f64,
    pub mops: f64,
    pub messages_sent: u64,
    pub values_sent: u64,
}

struct WorkerOutcome {
    history: ConvergenceHistory,
    seconds: f64,
    init_seconds: f64,
    stats: CommStats,
}

fn log_cycle(comm: &Communicator, debug_level: u32, cycle: usize, n: ResidualNorm) {
    if !comm.is_root() {
        return;
    }
    if debug_level >= 1 {
        info!("  iter {cycle:3}: l2 = {:.13e}, max = {:.13e}", n.l2, n.max);
    } else {
        debug!("iter {cycle}: l2 = {:.13e}, max = {:.13e}", n.l2, n.max);
    }
}

fn run_worker(
    comm: &mut Communicator,
    cfg: &MgConfig,
    plan: &DecompositionPlan,
) -> MgResult<WorkerOutcome> {
    let init_start = Instant::now();
    let settings = CycleSettings {
        coefficients: cfg.coefficients,
        post_sweeps: cfg.post_sweeps,
        coarse_sweeps: cfg.coarse_sweeps,
        debug_level: cfg.debug_level,
    };
    let mut solver = MultigridSolver::new(plan, comm.rank(), settings);

    solver.reset(comm)?;
    solver.compute_residual(comm)?;
    let untimed = solver.residual_norm(comm)?;
    if comm.is_root() {
        debug!("untimed initial norm: {:.13e}", untimed.l2);
    }

    for w in 0..cfg.warmup {
        solver.v_cycle(comm)?;
        solver.compute_residual(comm)?;
        if comm.is_root() {
            debug!("warm-up cycle {} done", w + 1);
        }
    }

    solver.reset(comm)?;
    comm.barrier()?;
    let init_seconds = init_start.elapsed().as_secs_f64();

    let start = Instant::now();
    solver.compute_residual(comm)?;
    let initial = solver.residual_norm(comm)?;
    log_cycle(comm, cfg.debug_level, 0, initial);
    let mut history = ConvergenceHistory::new(initial);

    for cycle in 1..=cfg.nit {
        solver.v_cycle(comm)?;
        solver.compute_residual(comm)?;
        let n = solver.residual_norm(comm)?;
        log_cycle(comm, cfg.debug_level, cycle, n);
        check_divergence(cycle, n, initial, cfg.divergence_factor)?;
        if n.l2 > history.final_norm().l2 && comm.is_root() {
            warn!(
                "residual grew in cycle {cycle}: {:.6e} -> {:.6e}",
                history.final_norm().l2,
                n.l2
            );
        }
        history.push(n);
    }

    let local = start.elapsed().as_secs_f64();
    let seconds = comm.allreduce_max(local)?;
    Ok(WorkerOutcome {
        history,
        seconds,
        init_seconds,
        stats: comm.stats(),
    })
}

/// Run the benchmark described by `cfg` on `cfg.workers` threads.
///
/// A failed verification is reported in `BenchmarkReport::verification`, not as an error.
pub fn run_benchmark(cfg: &MgConfig) -> MgResult<BenchmarkReport> {
    cfg.validate()?;
    let plan = cfg.plan()?;
    let dims = plan.topology().dims();

    info!(
        "NPB MG class {}: {}x{}x{} grid, {} iterations, {} levels, {} stencil",
        cfg.class,
        cfg.nx,
        cfg.ny,
        cfg.nz,
        cfg.nit,
        cfg.lt,
        cfg.coefficients.kind()
    );
    info!(
        "{} workers as {}x{}x{}; levels below {} run on rank 0",
        cfg.workers,
        dims[0],
        dims[1],
        dims[2],
        plan.first_distributed()
    );
    if cfg.convertdouble {
        debug!("convertdouble requested; arithmetic stays in f64");
    }

    let outcomes = run_spmd(cfg.workers, |comm| run_worker(comm, cfg, &plan))?;

    let messages_sent = outcomes.iter().map(|o| o.stats.messages_sent).sum();
    let values_sent = outcomes.iter().map(|o| o.stats.values_sent).sum();
    let init_seconds = outcomes
        .iter()
        .map(|o| o.init_seconds)
        .fold(0.0, f64::max);
    let root = outcomes
        .into_iter()
        .next()
        .ok_or_else(|| MgError::topology("no workers ran"))?;

    let final_norm = root.history.final_norm();
    let monotone = root.history.is_monotone();
    let mean_rate = root.history.mean_rate();
    if !monotone {
        warn!("residual norm was not monotone over the timed cycles");
    }
    let verification = Verification::check(cfg, final_norm.l2);
    let mops = mops(cfg.nit, cfg.global_extents(), root.seconds);

    info!(
        "finished in {:.3} s ({:.2} Mop/s), final l2 = {:.13e}: {}",
        root.seconds,
        mops,
        final_norm.l2,
        verification.label()
    );

    Ok(BenchmarkReport {
        config: cfg.clone(),
        process_grid: dims,
        first_distributed: plan.first_distributed(),
        history: root.history,
        final_norm,
        monotone,
        mean_rate,
        verification,
        seconds: root.seconds,
        init_seconds,
        mops,
        messages_sent,
        values_sent,
    })
}
