// src/config.rs
//
// Run configuration: the benchmark parameters plus the solver knobs, resolved once before
// any worker starts and written next to the results as config.json.

use std::fs::File;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{MgError, MgResult};
use crate::hierarchy::validate_extents;
use crate::params::{BuildInfo, NpbParams, ProblemClass};
use crate::stencil::StencilCoefficients;
use crate::topology::{DecompositionPlan, ProcessTopology};

pub const DEFAULT_DIVERGENCE_FACTOR: f64 = 1e6;
pub const DEFAULT_VERIFY_EPSILON: f64 = 1e-8;
pub const DEFAULT_OMEGA: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MgConfig {
    pub class: ProblemClass,
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Timed V-cycles.
    pub nit: usize,
    /// Hierarchy depth.
    pub lt: usize,
    /// Untimed V-cycles run before the timed section.
    pub warmup: usize,
    pub workers: usize,
    /// Explicit process grid; `None` uses the standard power-of-two split.
    pub process_grid: Option<[usize; 3]>,
    pub coefficients: StencilCoefficients,
    pub post_sweeps: usize,
    pub coarse_sweeps: usize,
    /// A cycle whose norm exceeds this multiple of the initial norm is a divergence.
    pub divergence_factor: f64,
    /// Relative tolerance of the final-norm check.
    pub verify_epsilon: f64,
    pub debug_level: u32,
    /// Accepted for compatibility; all arithmetic is `f64`.
    pub convertdouble: bool,
    pub build: BuildInfo,
}

/// Parse `NXxNYxNZ` (a single number means a cube).
pub fn parse_extents(s: &str) -> Result<[usize; 3], String> {
    let parts: Vec<&str> = s.trim().split(['x', 'X']).collect();
    let nums = parts
        .iter()
        .map(|p| p.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid extents '{s}': {e}"))?;
    match nums.as_slice() {
        [n] => Ok([*n; 3]),
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(format!("invalid extents '{s}': expected N or NXxNYxNZ")),
    }
}

impl MgConfig {
    pub fn from_params(p: &NpbParams) -> Self {
        let coefficients = if p.class.uses_small_smoother() {
            StencilCoefficients::npb_small()
        } else {
            StencilCoefficients::npb_large()
        };
        Self {
            class: p.class,
            nx: p.nx_default,
            ny: p.ny_default,
            nz: p.nz_default,
            nit: p.nit_default,
            lt: p.lt_default,
            warmup: 1,
            workers: 1,
            process_grid: None,
            coefficients,
            post_sweeps: 1,
            coarse_sweeps: 1,
            divergence_factor: DEFAULT_DIVERGENCE_FACTOR,
            verify_epsilon: DEFAULT_VERIFY_EPSILON,
            debug_level: p.debug_default,
            convertdouble: p.convertdouble,
            build: p.build.clone(),
        }
    }

    pub fn for_class(class: ProblemClass) -> Self {
        Self::from_params(&class.params())
    }

    /// Class defaults with `NPB_MG_*` overrides applied. Unparseable values are ignored
    /// with a warning.
    pub fn from_env(class: ProblemClass) -> Self {
        Self::for_class(class).with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().map(|s| s.trim().to_string())
        }
        fn get<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = var(name)?;
            match raw.parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring {name}={raw}: not a valid value");
                    None
                }
            }
        }

        if let Some(v) = var("NPB_MG_GRID") {
            match parse_extents(&v) {
                Ok([nx, ny, nz]) => {
                    self.nx = nx;
                    self.ny = ny;
                    self.nz = nz;
                }
                Err(e) => warn!("ignoring NPB_MG_GRID: {e}"),
            }
        }
        if let Some(v) = var("NPB_MG_PROCS") {
            match parse_extents(&v) {
                Ok(dims) => self.process_grid = Some(dims),
                Err(e) => warn!("ignoring NPB_MG_PROCS: {e}"),
            }
        }
        if let Some(v) = get::<usize>("NPB_MG_NIT") {
            self.nit = v;
        }
        if let Some(v) = get::<usize>("NPB_MG_LT") {
            self.lt = v;
        }
        if let Some(v) = get::<usize>("NPB_MG_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = get::<usize>("NPB_MG_WARMUP") {
            self.warmup = v;
        }
        if let Some(v) = get::<usize>("NPB_MG_POST_SWEEPS") {
            self.post_sweeps = v;
        }
        if let Some(v) = get::<usize>("NPB_MG_COARSE_SWEEPS") {
            self.coarse_sweeps = v;
        }
        if let Some(v) = get::<f64>("NPB_MG_DIVERGENCE_FACTOR") {
            self.divergence_factor = v;
        }
        if let Some(v) = get::<u32>("NPB_MG_DEBUG") {
            self.debug_level = v;
        }
        if let Some(v) = var("NPB_MG_STENCIL") {
            match v.to_ascii_lowercase().as_str() {
                "7" | "seven" | "7pt" => {
                    let omega = get::<f64>("NPB_MG_OMEGA").unwrap_or(DEFAULT_OMEGA);
                    self.coefficients = StencilCoefficients::seven_point(omega);
                }
                "27" | "npb" | "27pt" => {}
                other => warn!("ignoring NPB_MG_STENCIL={other}"),
            }
        }
        self
    }

    pub fn global_extents(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Coefficients the class prescribes.
    pub fn class_coefficients(&self) -> StencilCoefficients {
        Self::for_class(self.class).coefficients
    }

    /// True when the run is the standard problem of its class, so its final norm can be
    /// compared with the published reference.
    pub fn is_class_default(&self) -> bool {
        let n = self.class.grid_extent();
        self.global_extents() == [n; 3]
            && self.nit == self.class.iterations()
            && self.lt == self.class.levels()
            && self.coefficients == self.class_coefficients()
            && self.post_sweeps == 1
            && self.coarse_sweeps == 1
    }

    pub fn topology(&self) -> MgResult<ProcessTopology> {
        match self.process_grid {
            Some(dims) => {
                let t = ProcessTopology::with_dims(dims)?;
                if t.size() != self.workers {
                    return Err(MgError::topology(format!(
                        "process grid {}x{}x{} has {} workers, but {} were requested",
                        dims[0],
                        dims[1],
                        dims[2],
                        t.size(),
                        self.workers
                    )));
                }
                Ok(t)
            }
            None => ProcessTopology::for_workers(self.workers),
        }
    }

    pub fn plan(&self) -> MgResult<DecompositionPlan> {
        DecompositionPlan::new(self.topology()?, self.global_extents(), self.lt)
    }

    /// Check everything that can be checked before workers start.
    pub fn validate(&self) -> MgResult<()> {
        validate_extents(self.nx, self.ny, self.nz, self.lt)?;
        if self.lt < 2 {
            return Err(MgError::config(format!(
                "a V-cycle needs at least two levels (lt={})",
                self.lt
            )));
        }
        if self.nit == 0 {
            return Err(MgError::config("nit must be at least 1"));
        }
        if self.post_sweeps == 0 || self.coarse_sweeps == 0 {
            return Err(MgError::config(format!(
                "smoothing sweeps must be at least 1 (post={}, coarse={})",
                self.post_sweeps, self.coarse_sweeps
            )));
        }
        if !self.coefficients.operator.is_finite() || !self.coefficients.smoother.is_finite() {
            return Err(MgError::config("stencil coefficients must be finite"));
        }
        let drift = self.coefficients.operator.weight_sum();
        if drift.abs() > 1e-12 {
            warn!("operator weights sum to {drift:e}; constants are not in its null space");
        }
        if !(self.divergence_factor.is_finite() && self.divergence_factor > 1.0) {
            return Err(MgError::config(format!(
                "divergence factor must be a finite number above 1, got {}",
                self.divergence_factor
            )));
        }
        if !(self.verify_epsilon > 0.0) {
            return Err(MgError::config("verification tolerance must be positive"));
        }
        if self.workers == 0 {
            return Err(MgError::topology("at least one worker is required"));
        }
        self.plan().map(|_| ())
    }

    pub fn write_to_dir(&self, out_dir: &Path) -> MgResult<()> {
        let path = out_dir.join("config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
