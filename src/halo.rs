// src/halo.rs
//
// Ghost-layer updates.
//
// Axes are handled in order x, y, z. The x pass covers interior (j, k) only; the y pass
// covers every i including the x ghosts just filled; the z pass covers every (i, j). After
// the three passes the edges and corners of the halo hold the periodic images as well,
// without any diagonal messages.

use std::ops::Range;

use crate::comm::{Communicator, Tag};
use crate::error::MgResult;
use crate::grid::Grid3D;
use crate::topology::{DecompositionPlan, Face, LevelLayout};

/// Flat indices of the plane `index` along `axis`, restricted to the part of the
/// halo that is valid when that axis is processed.
fn plane_indices(g: &Grid3D, axis: usize, index: usize) -> impl Iterator<Item = usize> + use<> {
    let (m1, m2) = (g.m1(), g.m2());
    let full = [0..g.m1(), 0..g.m2(), 0..g.m3()];
    let inner = [1..g.n1 + 1, 1..g.n2 + 1, 1..g.n3 + 1];
    let mut r: [Range<usize>; 3] = std::array::from_fn(|d| {
        if d < axis {
            full[d].clone()
        } else {
            inner[d].clone()
        }
    });
    r[axis] = index..index + 1;
    let [ri, rj, rk] = r;
    rk.flat_map(move |k| {
        let ri = ri.clone();
        rj.clone()
            .flat_map(move |j| ri.clone().map(move |i| i + m1 * (j + m2 * k)))
    })
}

fn extent(g: &Grid3D, axis: usize) -> usize {
    g.extents()[axis]
}

/// Interior plane adjacent to `face`, i.e. the values a neighbour across `face` needs.
pub fn pack_face(g: &Grid3D, face: Face) -> Vec<f64> {
    let axis = face.axis();
    let index = if face.is_positive() { extent(g, axis) } else { 1 };
    plane_indices(g, axis, index).map(|id| g.data[id]).collect()
}

/// Write `values` into the ghost plane on `face`.
pub fn unpack_face(g: &mut Grid3D, face: Face, values: &[f64]) {
    let axis = face.axis();
    let index = if face.is_positive() { extent(g, axis) + 1 } else { 0 };
    let ids = plane_indices(g, axis, index);
    for (id, &v) in ids.zip(values) {
        g.data[id] = v;
    }
}

fn wrap_axis(g: &mut Grid3D, axis: usize) {
    let lo = Face::new(axis, false);
    let hi = Face::new(axis, true);
    let high_plane = pack_face(g, hi);
    let low_plane = pack_face(g, lo);
    unpack_face(g, lo, &high_plane);
    unpack_face(g, hi, &low_plane);
}

/// Periodic halo fill of a grid that holds a whole level.
pub fn fill_periodic(g: &mut Grid3D) {
    if g.is_empty() {
        return;
    }
    for axis in 0..3 {
        wrap_axis(g, axis);
    }
}

/// Per-worker halo exchange over the static neighbour tables of a plan.
pub struct HaloExchanger {
    dims: [usize; 3],
    /// Neighbours of this rank on each level; `None` on agglomerated levels.
    neighbors: Vec<Option<[usize; 6]>>,
}

impl HaloExchanger {
    pub fn new(plan: &DecompositionPlan, rank: usize) -> Self {
        let neighbors = (1..=plan.lt())
            .map(|k| plan.neighbors(k, rank).copied())
            .collect();
        Self {
            dims: plan.topology().dims(),
            neighbors,
        }
    }

    /// Refresh the halo of this worker's grid on level `k`.
    ///
    /// Agglomerated levels are local to rank 0 and get a periodic fill; workers that hold
    /// nothing on the level return immediately.
    pub fn exchange(&self, comm: &mut Communicator, k: usize, g: &mut Grid3D) -> MgResult<()> {
        let Some(nbr) = self.neighbors[k - 1] else {
            fill_periodic(g);
            return Ok(());
        };

        for axis in 0..3 {
            if self.dims[axis] == 1 {
                wrap_axis(g, axis);
                continue;
            }
            let lo = Face::new(axis, false);
            let hi = lo.opposite();

            // Our low plane becomes the lower neighbour's high ghost, and vice versa.
            comm.send(nbr[lo as usize], Tag::Halo { level: k, face: hi }, pack_face(g, lo))?;
            comm.send(nbr[hi as usize], Tag::Halo { level: k, face: lo }, pack_face(g, hi))?;

            let from_hi = comm.recv(nbr[hi as usize], Tag::Halo { level: k, face: hi })?;
            unpack_face(g, hi, &from_hi);
            let from_lo = comm.recv(nbr[lo as usize], Tag::Halo { level: k, face: lo })?;
            unpack_face(g, lo, &from_lo);
        }
        Ok(())
    }
}

/// Copy the interior block `rank` owns on level `k` out of a whole-level grid.
pub fn local_block(plan: &DecompositionPlan, k: usize, rank: usize, global: &Grid3D) -> Vec<f64> {
    match plan.layout(k) {
        LevelLayout::Distributed { local } => {
            let off = plan.offset(k, rank);
            global.read_block([off[0] + 1, off[1] + 1, off[2] + 1], *local)
        }
        LevelLayout::Agglomerated => global.interior_to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_spmd;
    use crate::topology::ProcessTopology;

    fn numbered(n1: usize, n2: usize, n3: usize) -> Grid3D {
        let mut g = Grid3D::new(n1, n2, n3);
        for k in 1..=n3 {
            for j in 1..=n2 {
                for i in 1..=n1 {
                    g.set(i, j, k, (i + 100 * j + 10_000 * k) as f64);
                }
            }
        }
        g
    }

    #[test]
    fn periodic_fill_wraps_faces_edges_and_corners() {
        let mut g = numbered(3, 4, 5);
        fill_periodic(&mut g);
        assert_eq!(g.get(0, 2, 3), g.get(3, 2, 3));
        assert_eq!(g.get(4, 2, 3), g.get(1, 2, 3));
        assert_eq!(g.get(2, 0, 3), g.get(2, 4, 3));
        assert_eq!(g.get(2, 3, 6), g.get(2, 3, 1));
        assert_eq!(g.get(0, 0, 0), g.get(3, 4, 5));
        assert_eq!(g.get(4, 5, 6), g.get(1, 1, 1));
        assert_eq!(g.get(0, 5, 0), g.get(3, 1, 5));
    }

    #[test]
    fn face_pack_sizes_follow_axis_order() {
        let g = Grid3D::new(3, 4, 5);
        assert_eq!(pack_face(&g, Face::NegX).len(), 4 * 5);
        assert_eq!(pack_face(&g, Face::PosY).len(), 5 * 5);
        assert_eq!(pack_face(&g, Face::NegZ).len(), 5 * 6);
    }

    fn distributed_matches_global(dims: [usize; 3], global: [usize; 3]) {
        let topo = ProcessTopology::with_dims(dims).unwrap();
        let plan = DecompositionPlan::new(topo, global, 2).unwrap();
        let k = 2;
        let mut whole = numbered(global[0], global[1], global[2]);
        let interior = whole.clone();
        fill_periodic(&mut whole);

        let blocks = run_spmd(topo.size(), |comm| {
            let rank = comm.rank();
            let [n1, n2, n3] = plan.local_extents(k);
            let mut g = Grid3D::new(n1, n2, n3);
            g.write_block([1, 1, 1], [n1, n2, n3], &local_block(&plan, k, rank, &interior));
            let ex = HaloExchanger::new(&plan, rank);
            ex.exchange(comm, k, &mut g)?;
            // Exchanging twice in a row must be harmless.
            ex.exchange(comm, k, &mut g)?;
            Ok(g)
        })
        .unwrap();

        for (rank, g) in blocks.iter().enumerate() {
            let off = plan.offset(k, rank);
            let [n1, n2, n3] = g.extents();
            let expect = whole.read_block(off, [n1 + 2, n2 + 2, n3 + 2]);
            assert_eq!(g.data, expect, "rank {rank} with dims {dims:?}");
        }
    }

    #[test]
    fn exchange_equals_periodic_fill_of_whole_grid() {
        distributed_matches_global([2, 2, 2], [8, 8, 8]);
        distributed_matches_global([1, 2, 4], [4, 8, 8]);
        distributed_matches_global([4, 1, 2], [8, 6, 4]);
    }
}
