// src/coarse.rs
//
// Agglomeration of the coarse levels on rank 0.
//
// Let g be the coarsest distributed level. On the way down, the residual of level g is
// gathered into a whole-level copy on rank 0, which then restricts and works through the
// levels below g on its own. On the way up, rank 0 interpolates the level g-1 correction
// into a zeroed whole-level grid and scatters the blocks back; each worker adds its
// block into u_g. Adding into zero reproduces the plain interpolation exactly, so the
// result matches an undecomposed run bit for bit.
//
// Workers other than rank 0 block in the scatter while rank 0 runs the coarse levels.

use crate::comm::{Communicator, Tag};
use crate::error::{MgError, MgResult};
use crate::grid::Grid3D;
use crate::halo::{fill_periodic, local_block};
use crate::stencil::{prolongate_add, restrict};
use crate::topology::DecompositionPlan;

/// Collect the interior of every worker's level-`k` block into `whole` on rank 0 and
/// fill its halo. `whole` is ignored on other ranks.
pub fn gather_level(
    comm: &mut Communicator,
    plan: &DecompositionPlan,
    k: usize,
    local: &Grid3D,
    whole: &mut Grid3D,
) -> MgResult<()> {
    let parts = comm.gather(Tag::Gather { level: k }, local.interior_to_vec())?;
    let Some(parts) = parts else {
        return Ok(());
    };
    if whole.extents() != plan.global_extents(k) {
        return Err(MgError::comm(
            comm.rank(),
            format!("level {k} gather target has the wrong shape"),
        ));
    }
    let ext = plan.local_extents(k);
    for (rank, part) in parts.iter().enumerate() {
        let off = plan.offset(k, rank);
        whole.write_block([off[0] + 1, off[1] + 1, off[2] + 1], ext, part);
    }
    fill_periodic(whole);
    Ok(())
}

/// Hand each worker its block of rank 0's whole-level grid. Returns this worker's block in
/// (k, j, i) order. Other ranks pass `None`.
pub fn scatter_level(
    comm: &mut Communicator,
    plan: &DecompositionPlan,
    k: usize,
    whole: Option<&Grid3D>,
) -> MgResult<Vec<f64>> {
    let parts = whole.map(|g| {
        (0..plan.nranks())
            .map(|rank| local_block(plan, k, rank, g))
            .collect::<Vec<_>>()
    });
    comm.scatter(Tag::Scatter { level: k }, parts)
}

/// Rank 0's whole-level grids for the boundary level `g` between the distributed and the
/// agglomerated part of the hierarchy.
pub struct Agglomeration {
    level: usize,
    residual: Grid3D,
    correction: Grid3D,
}

impl Agglomeration {
    /// Shadow grids for `rank`, or `None` when no level is agglomerated.
    pub fn new(plan: &DecompositionPlan, rank: usize) -> Option<Self> {
        let g = plan.first_distributed();
        if g == 1 {
            return None;
        }
        let (residual, correction) = if rank == 0 {
            let [n1, n2, n3] = plan.global_extents(g);
            (Grid3D::new(n1, n2, n3), Grid3D::new(n1, n2, n3))
        } else {
            (Grid3D::empty(), Grid3D::empty())
        };
        Some(Self {
            level: g,
            residual,
            correction,
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Gather `r_g` and restrict it into rank 0's `r_{g-1}` (ignored on other ranks).
    pub fn restrict_down(
        &mut self,
        comm: &mut Communicator,
        plan: &DecompositionPlan,
        r_fine: &Grid3D,
        r_coarse: &mut Grid3D,
    ) -> MgResult<()> {
        gather_level(comm, plan, self.level, r_fine, &mut self.residual)?;
        if comm.is_root() {
            restrict(&self.residual, r_coarse);
        }
        Ok(())
    }

    /// Interpolate rank 0's `u_{g-1}` and add each worker's share into its `u_g`.
    pub fn prolongate_up(
        &mut self,
        comm: &mut Communicator,
        plan: &DecompositionPlan,
        u_coarse: &Grid3D,
        u_fine: &mut Grid3D,
    ) -> MgResult<()> {
        let whole = if comm.is_root() {
            self.correction.zero();
            prolongate_add(u_coarse, &mut self.correction);
            Some(&self.correction)
        } else {
            None
        };
        let block = scatter_level(comm, plan, self.level, whole)?;
        u_fine.add_interior(&block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_spmd;
    use crate::topology::ProcessTopology;

    #[test]
    fn gather_then_scatter_returns_each_block() {
        let topo = ProcessTopology::for_workers(4).unwrap();
        let plan = DecompositionPlan::new(topo, [4, 8, 8], 2).unwrap();

        let out = run_spmd(4, |comm| {
            let rank = comm.rank();
            let [n1, n2, n3] = plan.local_extents(2);
            let mut local = Grid3D::new(n1, n2, n3);
            local.data.fill(rank as f64 + 1.0);

            let mut whole = if comm.is_root() {
                Grid3D::new(4, 8, 8)
            } else {
                Grid3D::empty()
            };
            gather_level(comm, &plan, 2, &local, &mut whole)?;
            let root_sum = whole.interior_to_vec().iter().sum::<f64>();
            let root = comm.is_root();
            let back = scatter_level(comm, &plan, 2, root.then_some(&whole))?;
            Ok((back == local.interior_to_vec(), root_sum))
        })
        .unwrap();

        assert!(out.iter().all(|(same, _)| *same));
        // 4 blocks of 64 cells holding 1, 2, 3, 4.
        assert_eq!(out[0].1, 64.0 * 10.0);
    }

    #[test]
    fn no_agglomeration_when_every_level_splits() {
        let plan = DecompositionPlan::new(ProcessTopology::for_workers(1).unwrap(), [8, 8, 8], 3)
            .unwrap();
        assert!(Agglomeration::new(&plan, 0).is_none());

        // 2x2x4 workers: the 2^3 level cannot split four ways in z.
        let plan = DecompositionPlan::new(ProcessTopology::for_workers(16).unwrap(), [8, 8, 8], 3)
            .unwrap();
        let a = Agglomeration::new(&plan, 0).unwrap();
        assert_eq!(a.level(), 2);
    }
}
