// src/topology.rs
//
// Process topology and per-level decomposition.
//
// Workers form a px × py × pz grid fixed for the whole run. A multigrid level is
// *distributed* when every axis splits evenly across the workers on that axis; each worker
// then owns one block of it. Coarser levels that cannot be split are *agglomerated*: they
// live whole on rank 0 and the other workers sit out those levels.
//
// Halving preserves divisibility downwards only, so the distributed levels are always a
// contiguous run from the finest level down to `first_distributed`.

use crate::error::{MgError, MgResult};
use crate::hierarchy::level_extents;

/// One of the six block faces, in exchange order (x, then y, then z).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Face {
    NegX = 0,
    PosX = 1,
    NegY = 2,
    PosY = 3,
    NegZ = 4,
    PosZ = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::NegX,
        Face::PosX,
        Face::NegY,
        Face::PosY,
        Face::NegZ,
        Face::PosZ,
    ];

    pub fn new(axis: usize, positive: bool) -> Face {
        Face::ALL[2 * axis + usize::from(positive)]
    }

    pub fn axis(self) -> usize {
        (self as usize) / 2
    }

    pub fn is_positive(self) -> bool {
        (self as usize) % 2 == 1
    }

    pub fn opposite(self) -> Face {
        match self {
            Face::NegX => Face::PosX,
            Face::PosX => Face::NegX,
            Face::NegY => Face::PosY,
            Face::PosY => Face::NegY,
            Face::NegZ => Face::PosZ,
            Face::PosZ => Face::NegZ,
        }
    }
}

/// Cartesian grid of workers with periodic wrap-around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTopology {
    dims: [usize; 3],
}

impl ProcessTopology {
    /// Standard NPB factorisation of a power-of-two worker count: log2(n) is spread
    /// over x, y, z with x getting the smallest share.
    pub fn for_workers(nworkers: usize) -> MgResult<Self> {
        if nworkers == 0 || !nworkers.is_power_of_two() {
            return Err(MgError::topology(format!(
                "worker count {nworkers} is not a power of two; use explicit process grid dimensions"
            )));
        }
        let log_p = nworkers.trailing_zeros() as usize;
        let dx = log_p / 3;
        let px = 1usize << dx;
        let dy = (log_p - dx) / 2;
        let py = 1usize << dy;
        let pz = nworkers / (px * py);
        Ok(Self { dims: [px, py, pz] })
    }

    pub fn with_dims(dims: [usize; 3]) -> MgResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(MgError::topology(format!(
                "process grid {}x{}x{} has an empty axis",
                dims[0], dims[1], dims[2]
            )));
        }
        Ok(Self { dims })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn coords(&self, rank: usize) -> [usize; 3] {
        let [px, py, _] = self.dims;
        [rank % px, (rank / px) % py, rank / (px * py)]
    }

    pub fn rank_at(&self, coords: [usize; 3]) -> usize {
        let [px, py, _] = self.dims;
        coords[0] + px * (coords[1] + py * coords[2])
    }

    /// Rank across `face` with periodic wrap-around (may be `rank` itself).
    pub fn neighbor(&self, rank: usize, face: Face) -> usize {
        let axis = face.axis();
        let mut c = self.coords(rank);
        let p = self.dims[axis];
        c[axis] = if face.is_positive() {
            (c[axis] + 1) % p
        } else {
            (c[axis] + p - 1) % p
        };
        self.rank_at(c)
    }
}

/// Placement of one level across the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelLayout {
    /// Every rank owns `local` interior cells starting at global cell `offset(rank)`.
    Distributed { local: [usize; 3] },
    /// Whole level on rank 0.
    Agglomerated,
}

impl LevelLayout {
    pub fn is_distributed(&self) -> bool {
        matches!(self, LevelLayout::Distributed { .. })
    }
}

/// Neighbour ranks of every rank, indexed by `Face as usize`.
pub type NeighborTable = Vec<[usize; 6]>;

/// Static decomposition of the whole hierarchy.
#[derive(Debug, Clone)]
pub struct DecompositionPlan {
    topology: ProcessTopology,
    global: [usize; 3],
    lt: usize,
    layouts: Vec<LevelLayout>,
    /// One table per level; `None` for agglomerated levels.
    adjacency: Vec<Option<NeighborTable>>,
}

impl DecompositionPlan {
    pub fn new(topology: ProcessTopology, global: [usize; 3], lt: usize) -> MgResult<Self> {
        let [nx, ny, nz] = global;
        crate::hierarchy::validate_extents(nx, ny, nz, lt)?;
        if lt < 2 {
            return Err(MgError::config(format!(
                "a V-cycle needs at least two levels (lt={lt})"
            )));
        }

        let dims = topology.dims();
        for axis in 0..3 {
            if global[axis] % dims[axis] != 0 {
                return Err(MgError::topology(format!(
                    "finest grid {}x{}x{} cannot be split over a {}x{}x{} process grid",
                    nx, ny, nz, dims[0], dims[1], dims[2]
                )));
            }
        }

        let table: NeighborTable = (0..topology.size())
            .map(|rank| Face::ALL.map(|f| topology.neighbor(rank, f)))
            .collect();

        let mut layouts = Vec::with_capacity(lt);
        let mut adjacency = Vec::with_capacity(lt);
        for k in 1..=lt {
            let ext = level_extents(nx, ny, nz, lt, k);
            let splits = (0..3).all(|a| ext[a] % dims[a] == 0);
            if splits {
                let local = [ext[0] / dims[0], ext[1] / dims[1], ext[2] / dims[2]];
                layouts.push(LevelLayout::Distributed { local });
                adjacency.push(Some(table.clone()));
            } else {
                layouts.push(LevelLayout::Agglomerated);
                adjacency.push(None);
            }
        }

        Ok(Self {
            topology,
            global,
            lt,
            layouts,
            adjacency,
        })
    }

    pub fn topology(&self) -> &ProcessTopology {
        &self.topology
    }

    pub fn lt(&self) -> usize {
        self.lt
    }

    pub fn nranks(&self) -> usize {
        self.topology.size()
    }

    pub fn global_extents(&self, k: usize) -> [usize; 3] {
        let [nx, ny, nz] = self.global;
        level_extents(nx, ny, nz, self.lt, k)
    }

    pub fn layout(&self, k: usize) -> &LevelLayout {
        &self.layouts[k - 1]
    }

    /// Coarsest level that is still split across the workers.
    pub fn first_distributed(&self) -> usize {
        (1..=self.lt)
            .find(|&k| self.layout(k).is_distributed())
            .unwrap_or(self.lt)
    }

    /// Interior extents `rank` stores for level `k` (whole level when agglomerated).
    pub fn local_extents(&self, k: usize) -> [usize; 3] {
        match self.layout(k) {
            LevelLayout::Distributed { local } => *local,
            LevelLayout::Agglomerated => self.global_extents(k),
        }
    }

    /// Global interior offset of `rank`'s block on a distributed level.
    pub fn offset(&self, k: usize, rank: usize) -> [usize; 3] {
        match self.layout(k) {
            LevelLayout::Distributed { local } => {
                let c = self.topology.coords(rank);
                [c[0] * local[0], c[1] * local[1], c[2] * local[2]]
            }
            LevelLayout::Agglomerated => [0, 0, 0],
        }
    }

    pub fn neighbors(&self, k: usize, rank: usize) -> Option<&[usize; 6]> {
        self.adjacency[k - 1].as_ref().map(|t| &t[rank])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_counts_follow_npb_split() {
        let dims = |n| ProcessTopology::for_workers(n).unwrap().dims();
        assert_eq!(dims(1), [1, 1, 1]);
        assert_eq!(dims(2), [1, 1, 2]);
        assert_eq!(dims(4), [1, 2, 2]);
        assert_eq!(dims(8), [2, 2, 2]);
        assert_eq!(dims(16), [2, 2, 4]);
        assert_eq!(dims(64), [4, 4, 4]);
    }

    #[test]
    fn non_power_of_two_is_topology_error() {
        for n in [0, 3, 6, 12] {
            assert!(matches!(
                ProcessTopology::for_workers(n),
                Err(MgError::Topology { .. })
            ));
        }
        assert!(ProcessTopology::with_dims([3, 1, 0]).is_err());
    }

    #[test]
    fn coords_and_neighbors_wrap() {
        let t = ProcessTopology::with_dims([2, 3, 2]).unwrap();
        for rank in 0..t.size() {
            assert_eq!(t.rank_at(t.coords(rank)), rank);
            for f in Face::ALL {
                assert_eq!(t.neighbor(t.neighbor(rank, f), f.opposite()), rank);
            }
        }
        assert_eq!(t.coords(7), [1, 0, 1]);
        assert_eq!(t.neighbor(0, Face::NegY), t.rank_at([0, 2, 0]));
        assert_eq!(t.neighbor(1, Face::PosX), 0);
    }

    #[test]
    fn coarse_levels_agglomerate_when_too_small() {
        // 16 workers as 2x2x4 on 32^3, 5 levels: level 1 is 2^3 and cannot split over 4 in z.
        let t = ProcessTopology::for_workers(16).unwrap();
        let plan = DecompositionPlan::new(t, [32, 32, 32], 5).unwrap();
        assert_eq!(plan.layout(1), &LevelLayout::Agglomerated);
        assert!(plan.layout(2).is_distributed());
        assert_eq!(plan.first_distributed(), 2);
        assert_eq!(plan.local_extents(5), [16, 16, 8]);
        assert_eq!(plan.local_extents(1), [2, 2, 2]);
        assert_eq!(plan.offset(5, 3), [16, 16, 0]);
        assert!(plan.neighbors(1, 0).is_none());
        assert_eq!(plan.neighbors(5, 0).unwrap()[Face::PosZ as usize], 4);
    }

    #[test]
    fn finest_level_must_split() {
        let t = ProcessTopology::with_dims([3, 1, 1]).unwrap();
        let err = DecompositionPlan::new(t, [16, 16, 16], 3).unwrap_err();
        assert!(matches!(err, MgError::Topology { .. }), "{err}");
    }

    #[test]
    fn single_level_plans_are_rejected() {
        let t = ProcessTopology::for_workers(1).unwrap();
        let err = DecompositionPlan::new(t, [4, 4, 4], 1).unwrap_err();
        assert!(matches!(err, MgError::Config { .. }), "{err}");
        assert!(DecompositionPlan::new(t, [4, 4, 4], 2).is_ok());
    }
}
