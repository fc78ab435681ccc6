// src/lib.rs

pub mod coarse;
pub mod comm;
pub mod config;
pub mod driver;
pub mod error;
pub mod grid;
pub mod halo;
pub mod hierarchy;
pub mod initial_states;
pub mod params;
pub mod report;
pub mod stencil;
pub mod topology;
pub mod vcycle;
pub mod verify;
pub mod visualisation;

pub use config::MgConfig;
pub use driver::{BenchmarkReport, ConvergenceHistory, run_benchmark};
pub use error::{MgError, MgResult};
pub use params::{NpbParams, ProblemClass};
pub use vcycle::ResidualNorm;
pub use verify::Verification;
