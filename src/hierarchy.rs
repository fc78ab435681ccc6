// src/hierarchy.rs
//
// Multigrid level hierarchy.
//
// Levels are numbered 1 (coarsest) to lt (finest). Level k has n / 2^(lt-k) cells per
// axis, so every level is exactly half its finer neighbour. `build_hierarchy` is the
// plain global allocation; `Level` is one worker's view of a level, which is either its
// own block of a distributed level or, on rank 0 only, the whole of an agglomerated one.

use crate::error::{MgError, MgResult};
use crate::grid::Grid3D;
use crate::topology::{DecompositionPlan, LevelLayout};

/// Check that (nx, ny, nz) can be halved `lt - 1` times.
pub fn validate_extents(nx: usize, ny: usize, nz: usize, lt: usize) -> MgResult<()> {
    if lt == 0 {
        return Err(MgError::config("hierarchy depth lt must be at least 1"));
    }
    if lt > usize::BITS as usize {
        return Err(MgError::config(format!("hierarchy depth lt={lt} is too large")));
    }
    let step = 1usize << (lt - 1);
    for (name, n) in [("nx", nx), ("ny", ny), ("nz", nz)] {
        if n == 0 {
            return Err(MgError::config(format!("{name} must be positive")));
        }
        if n % step != 0 {
            return Err(MgError::config(format!(
                "{name}={n} is not divisible by 2^(lt-1)={step} (lt={lt})"
            )));
        }
    }
    Ok(())
}

/// Global extents of level `k` (1-based) in a hierarchy of depth `lt`.
pub fn level_extents(nx: usize, ny: usize, nz: usize, lt: usize, k: usize) -> [usize; 3] {
    debug_assert!(k >= 1 && k <= lt);
    let shift = lt - k;
    [nx >> shift, ny >> shift, nz >> shift]
}

/// Allocate `lt` zeroed grids, coarsest first, each with a halo border.
pub fn build_hierarchy(nx: usize, ny: usize, nz: usize, lt: usize) -> MgResult<Vec<Grid3D>> {
    validate_extents(nx, ny, nz, lt)?;
    Ok((1..=lt)
        .map(|k| {
            let [n1, n2, n3] = level_extents(nx, ny, nz, lt, k);
            Grid3D::new(n1, n2, n3)
        })
        .collect())
}

/// One worker's storage for a level.
pub struct Level {
    /// 1-based level index.
    pub k: usize,
    pub layout: LevelLayout,
    /// Correction (or, on the finest level, the solution).
    pub u: Grid3D,
    /// Residual; after restriction, the right-hand side of this level.
    pub r: Grid3D,
    /// Copy of the restricted right-hand side, kept only when more than one smoothing
    /// sweep runs per level.
    pub rhs: Option<Grid3D>,
}

impl Level {
    /// True when this worker stores data for the level.
    pub fn is_owned(&self) -> bool {
        !self.u.is_empty()
    }
}

/// Allocate the levels `rank` holds under `plan`.
pub fn build_worker_levels(plan: &DecompositionPlan, rank: usize, keep_rhs: bool) -> Vec<Level> {
    (1..=plan.lt())
        .map(|k| {
            let layout = plan.layout(k).clone();
            let owned = match &layout {
                LevelLayout::Distributed { .. } => true,
                LevelLayout::Agglomerated => rank == 0,
            };
            let (u, r, rhs) = if owned {
                let [n1, n2, n3] = plan.local_extents(k);
                let rhs = keep_rhs.then(|| Grid3D::new(n1, n2, n3));
                (Grid3D::new(n1, n2, n3), Grid3D::new(n1, n2, n3), rhs)
            } else {
                (Grid3D::empty(), Grid3D::empty(), None)
            };
            Level {
                k,
                layout,
                u,
                r,
                rhs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_c_hierarchy_halves_down_to_two_cells() {
        // Only the shape arithmetic; allocating 512^3 here would be wasteful.
        for k in 1..=9 {
            let e = level_extents(512, 512, 512, 9, k);
            assert_eq!(e, [2 << (k - 1); 3]);
        }
        assert!(validate_extents(512, 512, 512, 9).is_ok());
    }

    #[test]
    fn build_hierarchy_orders_levels_coarsest_first() {
        let levels = build_hierarchy(16, 8, 32, 3).unwrap();
        let extents: Vec<[usize; 3]> = levels.iter().map(|g| g.extents()).collect();
        assert_eq!(extents, vec![[4, 2, 8], [8, 4, 16], [16, 8, 32]]);
        assert!(levels.iter().all(|g| g.data.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn indivisible_extents_are_config_errors() {
        let err = build_hierarchy(12, 16, 16, 4).unwrap_err();
        assert!(matches!(err, MgError::Config { .. }), "{err}");
        assert!(matches!(
            build_hierarchy(16, 16, 16, 0),
            Err(MgError::Config { .. })
        ));
        assert!(matches!(
            build_hierarchy(16, 0, 16, 1),
            Err(MgError::Config { .. })
        ));
    }
}
