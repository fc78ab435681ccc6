// src/params.rs
//
// Problem parameters for the MG benchmark.
//
// `NpbParams` is the compile-time parameter set a benchmark build is configured with
// (grid extents, iteration count, hierarchy depth, debug level, precision flag) plus the
// build metadata that only ever appears in the results report. `NpbParams::class_c()`
// mirrors the generated class-C parameter file; the other standard classes are produced
// by `ProblemClass::params()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the benchmark suite whose problem definitions are implemented here.
pub const NPB_VERSION: &str = "3.4.4";

/// Standard problem sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemClass {
    S,
    W,
    A,
    B,
    C,
    D,
    E,
}

impl ProblemClass {
    pub const ALL: [ProblemClass; 7] = [
        ProblemClass::S,
        ProblemClass::W,
        ProblemClass::A,
        ProblemClass::B,
        ProblemClass::C,
        ProblemClass::D,
        ProblemClass::E,
    ];

    /// Cubic grid extent along each axis.
    pub fn grid_extent(self) -> usize {
        match self {
            Self::S => 32,
            Self::W => 128,
            Self::A | Self::B => 256,
            Self::C => 512,
            Self::D => 1024,
            Self::E => 2048,
        }
    }

    pub fn iterations(self) -> usize {
        match self {
            Self::S | Self::W | Self::A => 4,
            Self::B | Self::C => 20,
            Self::D | Self::E => 50,
        }
    }

    /// Number of multigrid levels: the coarsest level is always 2×2×2.
    pub fn levels(self) -> usize {
        self.grid_extent().trailing_zeros() as usize
    }

    /// The small classes use the stronger-damped smoother.
    pub fn uses_small_smoother(self) -> bool {
        matches!(self, Self::S | Self::W | Self::A)
    }

    /// Published L2 residual norm after `iterations()` cycles.
    pub fn reference_norm(self) -> f64 {
        match self {
            Self::S => 0.5307707005734e-04,
            Self::W => 0.6467329375339e-05,
            Self::A => 0.2433365309069e-05,
            Self::B => 0.1800564401355e-05,
            Self::C => 0.5706732285740e-06,
            Self::D => 0.1583275060440e-09,
            Self::E => 0.8157592357404e-10,
        }
    }

    pub fn params(self) -> NpbParams {
        let n = self.grid_extent();
        NpbParams {
            class: self,
            nx_default: n,
            ny_default: n,
            nz_default: n,
            nit_default: self.iterations(),
            lt_default: self.levels(),
            debug_default: 0,
            convertdouble: false,
            build: BuildInfo::current(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::W => "W",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
        }
    }
}

impl fmt::Display for ProblemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(Self::S),
            "W" => Ok(Self::W),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            other => Err(format!("unknown problem class '{other}' (expected S|W|A|B|C|D|E)")),
        }
    }
}

/// Build metadata carried into the results report. Never used by the numerics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub compile_time: String,
    pub npb_version: String,
    pub crate_version: String,
    pub compiler: String,
    pub profile: String,
    pub compile_flags: String,
    pub rand: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            compile_time: option_env!("SOURCE_DATE_EPOCH")
                .unwrap_or("unknown")
                .to_string(),
            npb_version: NPB_VERSION.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            compiler: "rustc".to_string(),
            profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
            compile_flags: option_env!("RUSTFLAGS").unwrap_or("(none)").to_string(),
            rand: "lcg46".to_string(),
        }
    }
}

/// The benchmark's parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpbParams {
    pub class: ProblemClass,
    pub nx_default: usize,
    pub ny_default: usize,
    pub nz_default: usize,
    pub nit_default: usize,
    pub lt_default: usize,
    pub debug_default: u32,
    /// Request to demote double precision. Values are always `f64` here.
    pub convertdouble: bool,
    pub build: BuildInfo,
}

impl NpbParams {
    /// Class C: 512³ grid, 20 iterations, 9 levels.
    pub fn class_c() -> Self {
        Self {
            class: ProblemClass::C,
            nx_default: 512,
            ny_default: 512,
            nz_default: 512,
            nit_default: 20,
            lt_default: 9,
            debug_default: 0,
            convertdouble: false,
            build: BuildInfo::current(),
        }
    }
}
