// src/verify.rs
//
// Comparison of the final residual norm with the published class reference.

use serde::{Deserialize, Serialize};

use crate::config::MgConfig;
use crate::error::{MgError, MgResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    Passed {
        computed: f64,
        reference: f64,
        relative: f64,
        epsilon: f64,
    },
    Failed {
        computed: f64,
        reference: f64,
        relative: f64,
        epsilon: f64,
    },
    /// The run was not the standard problem of its class; there is nothing to compare with.
    Unverified { computed: f64 },
}

impl Verification {
    pub fn check(cfg: &MgConfig, final_l2: f64) -> Self {
        if !cfg.is_class_default() {
            return Self::Unverified { computed: final_l2 };
        }
        Self::against(final_l2, cfg.class.reference_norm(), cfg.verify_epsilon)
    }

    /// Relative comparison `|computed - reference| / reference <= epsilon`.
    pub fn against(computed: f64, reference: f64, epsilon: f64) -> Self {
        let relative = ((computed - reference) / reference).abs();
        if relative <= epsilon {
            Self::Passed {
                computed,
                reference,
                relative,
                epsilon,
            }
        } else {
            // NaN lands here too.
            Self::Failed {
                computed,
                reference,
                relative,
                epsilon,
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed { .. } => "SUCCESSFUL",
            Self::Failed { .. } => "FAILED",
            Self::Unverified { .. } => "UNVERIFIED",
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// `Err(ValidationMismatch)` for a failed check; passed and unverified runs are `Ok`.
    pub fn into_result(self) -> MgResult<Self> {
        match self {
            Self::Failed {
                computed,
                reference,
                relative,
                epsilon,
            } => Err(MgError::ValidationMismatch {
                computed,
                reference,
                relative,
                epsilon,
            }),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ProblemClass;

    #[test]
    fn reference_value_passes() {
        let cfg = MgConfig::for_class(ProblemClass::C);
        let v = Verification::check(&cfg, 0.5706732285740e-06 * (1.0 + 5e-9));
        assert!(v.passed(), "{v:?}");
        assert!(v.into_result().is_ok());
    }

    #[test]
    fn off_by_more_than_epsilon_fails() {
        let cfg = MgConfig::for_class(ProblemClass::S);
        let v = Verification::check(&cfg, 0.5307707005734e-04 * 1.001);
        assert_eq!(v.label(), "FAILED");
        assert!(matches!(
            v.into_result(),
            Err(MgError::ValidationMismatch { .. })
        ));
        assert!(!Verification::against(f64::NAN, 1.0, 1e-8).passed());
    }

    #[test]
    fn modified_runs_are_unverified() {
        let mut cfg = MgConfig::for_class(ProblemClass::S);
        cfg.nit = 3;
        let v = Verification::check(&cfg, 1.0);
        assert_eq!(v, Verification::Unverified { computed: 1.0 });
        assert!(v.into_result().is_ok());
    }
}
