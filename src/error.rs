// src/error.rs
//
// Error type shared by every stage of a run. All variants are fatal to the run;
// nothing in the solver retries.

use thiserror::Error;

pub type MgResult<T> = Result<T, MgError>;

#[derive(Error, Debug)]
pub enum MgError {
    /// Grid extents, hierarchy depth, or solver settings that cannot form a valid hierarchy.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Worker count or process grid incompatible with the decomposition.
    #[error("topology error: {message}")]
    Topology { message: String },

    /// Residual norm left the admissible range during the timed cycles.
    #[error(
        "residual diverged at cycle {cycle}: norm {norm:e} exceeds {factor:e} x initial norm {initial:e}"
    )]
    Divergence {
        cycle: usize,
        norm: f64,
        initial: f64,
        factor: f64,
    },

    /// Final norm differs from the class reference beyond the tolerance.
    #[error(
        "verification failed: computed {computed:.13e}, reference {reference:.13e}, relative error {relative:e} > {epsilon:e}"
    )]
    ValidationMismatch {
        computed: f64,
        reference: f64,
        relative: f64,
        epsilon: f64,
    },

    /// Message passing failed: a peer aborted or a channel closed.
    #[error("communication error on rank {rank}: {message}")]
    Comm { rank: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MgError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    pub fn comm(rank: usize, message: impl Into<String>) -> Self {
        Self::Comm {
            rank,
            message: message.into(),
        }
    }

    /// True for the secondary errors raised in peers after another worker failed.
    pub fn is_peer_abort(&self) -> bool {
        matches!(self, Self::Comm { .. })
    }
}
