// src/initial_states.rs
//
// Right-hand side of the benchmark: twenty unit charges on a periodic grid.
//
// Conventions:
// - Values come from the NPB linear congruential generator
//   x_{k+1} = 5^13 x_k mod 2^46, scaled by 2^-46. Integer arithmetic mod 2^46 is exact, so
//   the stream is identical to the floating-point reference generator.
// - Global interior point p = gx + nx*(gy + ny*gz) (0-based) takes the (p+1)-th value after
//   the seed. Each worker jumps straight to its own block.
// - The ten largest values become +1, the ten smallest -1, everything else 0. Equal values
//   are ordered by global index. When the two sets overlap (grids of fewer than 20 cells)
//   the +1 wins because it is written last.

use log::debug;
use rayon::prelude::*;

use crate::comm::{Communicator, Tag};
use crate::error::{MgError, MgResult};
use crate::grid::Grid3D;
use crate::halo::HaloExchanger;
use crate::topology::DecompositionPlan;

/// 5^13.
pub const LCG_MULTIPLIER: u64 = 1_220_703_125;
pub const LCG_SEED: u64 = 314_159_265;
/// Number of +1 (and of -1) charges.
pub const CHARGES: usize = 10;

const MASK46: u64 = (1 << 46) - 1;
const R46: f64 = 1.0 / (1u64 << 46) as f64;

#[inline]
fn mul46(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) as u64) & MASK46
}

/// `a^n mod 2^46`.
pub fn pow46(a: u64, mut n: u64) -> u64 {
    let mut result = 1u64;
    let mut base = a & MASK46;
    while n > 0 {
        if n & 1 == 1 {
            result = mul46(result, base);
        }
        base = mul46(base, base);
        n >>= 1;
    }
    result
}

/// NPB 46-bit multiplicative congruential generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg46 {
    state: u64,
    multiplier: u64,
}

impl Lcg46 {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed & MASK46,
            multiplier: LCG_MULTIPLIER,
        }
    }

    /// Advance one step and return the new state scaled into (0, 1).
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.state = mul46(self.state, self.multiplier);
        self.state as f64 * R46
    }

    /// Advance `n` steps without producing values.
    pub fn skip(&mut self, n: u64) {
        self.state = mul46(self.state, pow46(self.multiplier, n));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    value: f64,
    index: u64,
}

fn higher(a: &Candidate, b: &Candidate) -> bool {
    a.value > b.value || (a.value == b.value && a.index < b.index)
}

fn lower(a: &Candidate, b: &Candidate) -> bool {
    a.value < b.value || (a.value == b.value && a.index < b.index)
}

/// Keep `list` sorted best-first under `better` and at most `CHARGES` long.
fn offer(list: &mut Vec<Candidate>, c: Candidate, better: fn(&Candidate, &Candidate) -> bool) {
    if list.len() == CHARGES && !better(&c, &list[CHARGES - 1]) {
        return;
    }
    let pos = list.iter().position(|x| better(&c, x)).unwrap_or(list.len());
    list.insert(pos, c);
    list.truncate(CHARGES);
}

#[derive(Debug, Clone, Default)]
struct Extremes {
    largest: Vec<Candidate>,
    smallest: Vec<Candidate>,
}

impl Extremes {
    fn offer(&mut self, c: Candidate) {
        offer(&mut self.largest, c, higher);
        offer(&mut self.smallest, c, lower);
    }

    fn merge(mut self, other: Extremes) -> Extremes {
        for c in other.largest {
            offer(&mut self.largest, c, higher);
        }
        for c in other.smallest {
            offer(&mut self.smallest, c, lower);
        }
        self
    }

    /// `[n_largest, n_smallest, (value, index)...]`.
    fn encode(&self) -> Vec<f64> {
        let mut out = vec![self.largest.len() as f64, self.smallest.len() as f64];
        for c in self.largest.iter().chain(&self.smallest) {
            out.push(c.value);
            out.push(c.index as f64);
        }
        out
    }

    fn decode(buf: &[f64]) -> Option<Extremes> {
        let nl = *buf.first()? as usize;
        let ns = *buf.get(1)? as usize;
        if buf.len() != 2 + 2 * (nl + ns) {
            return None;
        }
        let cands: Vec<Candidate> = buf[2..]
            .chunks_exact(2)
            .map(|p| Candidate {
                value: p[0],
                index: p[1] as u64,
            })
            .collect();
        Some(Extremes {
            largest: cands[..nl].to_vec(),
            smallest: cands[nl..].to_vec(),
        })
    }
}

/// Fill the interior of this worker's finest-level block with the generator stream.
fn fill_random(z: &mut Grid3D, global: [usize; 3], offset: [usize; 3]) {
    let [nx, ny, _] = global;
    let (n1, n2, n3) = (z.n1, z.n2, z.n3);
    let m1 = z.m1();
    let plane = z.plane_len();

    let first = (offset[0] + nx * (offset[1] + ny * offset[2])) as u64;
    let mut start = Lcg46::new(LCG_SEED);
    start.skip(first);

    z.data
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(k, p)| {
            if k == 0 || k > n3 {
                return;
            }
            let mut row_start = start;
            row_start.skip(((k - 1) * nx * ny) as u64);
            for j in 1..=n2 {
                let mut g = row_start;
                let row = j * m1;
                for v in &mut p[row + 1..row + 1 + n1] {
                    *v = g.next_f64();
                }
                row_start.skip(nx as u64);
            }
        });
}

fn local_extremes(z: &Grid3D, global: [usize; 3], offset: [usize; 3]) -> Extremes {
    let [nx, ny, _] = global;
    let (m1, n1, n2, n3) = (z.m1(), z.n1, z.n2, z.n3);
    let partials: Vec<Extremes> = z
        .data
        .par_chunks(z.plane_len())
        .enumerate()
        .map(|(k, p)| {
            let mut ex = Extremes::default();
            if k == 0 || k > n3 {
                return ex;
            }
            let gz = offset[2] + k - 1;
            for j in 1..=n2 {
                let gy = offset[1] + j - 1;
                for i in 1..=n1 {
                    let gx = offset[0] + i - 1;
                    ex.offer(Candidate {
                        value: p[j * m1 + i],
                        index: (gx + nx * (gy + ny * gz)) as u64,
                    });
                }
            }
            ex
        })
        .collect();
    partials
        .into_iter()
        .fold(Extremes::default(), Extremes::merge)
}

/// Place the charges into `z`, the worker's finest-level block, and refresh its halo.
pub fn zran3(
    comm: &mut Communicator,
    plan: &DecompositionPlan,
    exchanger: &HaloExchanger,
    z: &mut Grid3D,
) -> MgResult<()> {
    let lt = plan.lt();
    let rank = comm.rank();
    let global = plan.global_extents(lt);
    let offset = plan.offset(lt, rank);

    fill_random(z, global, offset);
    let mine = local_extremes(z, global, offset);

    let gathered = comm.gather(Tag::Charges, mine.encode())?;
    let positions = match gathered {
        Some(parts) => {
            let mut best = Extremes::default();
            for (src, buf) in parts.iter().enumerate() {
                let ex = Extremes::decode(buf).ok_or_else(|| {
                    MgError::comm(rank, format!("malformed charge candidates from rank {src}"))
                })?;
                best = best.merge(ex);
            }
            debug!(
                "source charges: max {:.16e} at {}, min {:.16e} at {}",
                best.largest.first().map_or(f64::NAN, |c| c.value),
                best.largest.first().map_or(0, |c| c.index),
                best.smallest.first().map_or(f64::NAN, |c| c.value),
                best.smallest.first().map_or(0, |c| c.index),
            );
            let mut pos = vec![best.largest.len() as f64];
            pos.extend(best.largest.iter().map(|c| c.index as f64));
            pos.extend(best.smallest.iter().map(|c| c.index as f64));
            comm.broadcast(Some(pos))?
        }
        None => comm.broadcast(None)?,
    };

    let Some((&n_plus, rest)) = positions.split_first() else {
        return Err(MgError::comm(rank, "empty charge positions"));
    };
    let (plus, minus) = rest.split_at((n_plus as usize).min(rest.len()));

    z.zero();
    let [nx, ny, _] = global;
    let mut place = |index: u64, value: f64| {
        let index = index as usize;
        let g = [index % nx, (index / nx) % ny, index / (nx * ny)];
        let ext = z.extents();
        if (0..3).all(|d| g[d] >= offset[d] && g[d] < offset[d] + ext[d]) {
            z.set(
                g[0] - offset[0] + 1,
                g[1] - offset[1] + 1,
                g[2] - offset[2] + 1,
                value,
            );
        }
    };
    for &p in minus {
        place(p as u64, -1.0);
    }
    for &p in plus {
        place(p as u64, 1.0);
    }

    exchanger.exchange(comm, lt, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarse::gather_level;
    use crate::comm::run_spmd;
    use crate::topology::ProcessTopology;

    #[test]
    fn generator_reproduces_reference_stream() {
        let mut g = Lcg46::new(LCG_SEED);
        assert_eq!(g.next_f64(), 0.7945219111887383);
        assert_eq!(g, Lcg46::new(55_909_509_111_989));
        assert_eq!(g.next_f64(), 0.8690652738745399);
        assert_eq!(g.next_f64(), 0.6476317284643329);
        assert_eq!(pow46(LCG_MULTIPLIER, 1000), 18_904_382_368_481);
    }

    #[test]
    fn skip_matches_stepping() {
        let mut a = Lcg46::new(LCG_SEED);
        let mut b = a;
        for _ in 0..777 {
            a.next_f64();
        }
        b.skip(777);
        assert_eq!(a, b);
        assert_eq!(a.next_f64(), b.next_f64());
    }

    #[test]
    fn offset_block_continues_the_global_stream() {
        let global = [8, 4, 4];
        let offset = [4, 2, 1];
        let mut z = Grid3D::new(4, 2, 3);
        fill_random(&mut z, global, offset);

        let mut g = Lcg46::new(LCG_SEED);
        let stream: Vec<f64> = (0..8 * 4 * 4).map(|_| g.next_f64()).collect();
        for k in 1..=3 {
            for j in 1..=2 {
                for i in 1..=4 {
                    let p = (offset[0] + i - 1) + 8 * ((offset[1] + j - 1) + 4 * (offset[2] + k - 1));
                    assert_eq!(z.get(i, j, k), stream[p], "({i}, {j}, {k})");
                }
            }
        }
    }

    fn source_field(workers: usize, n: usize) -> Grid3D {
        let topo = ProcessTopology::for_workers(workers).unwrap();
        let plan = DecompositionPlan::new(topo, [n, n, n], 2).unwrap();
        let out = run_spmd(workers, |comm| {
            let [n1, n2, n3] = plan.local_extents(2);
            let mut z = Grid3D::new(n1, n2, n3);
            let ex = HaloExchanger::new(&plan, comm.rank());
            zran3(comm, &plan, &ex, &mut z)?;
            let mut whole = if comm.is_root() {
                Grid3D::new(n, n, n)
            } else {
                Grid3D::empty()
            };
            gather_level(comm, &plan, 2, &z, &mut whole)?;
            Ok(whole)
        })
        .unwrap();
        out.into_iter().next().unwrap()
    }

    #[test]
    fn charges_land_on_stream_extremes() {
        let z = source_field(1, 8);
        let values = z.interior_to_vec();
        let at = |v: f64| -> Vec<usize> {
            values
                .iter()
                .enumerate()
                .filter(|(_, x)| **x == v)
                .map(|(p, _)| p)
                .collect()
        };
        assert_eq!(at(1.0), vec![97, 130, 137, 164, 176, 249, 363, 403, 422, 441]);
        assert_eq!(at(-1.0), vec![4, 12, 36, 121, 280, 328, 377, 430, 453, 477]);
        assert_eq!(values.iter().filter(|x| **x == 0.0).count(), 512 - 20);
    }

    #[test]
    fn charges_do_not_depend_on_worker_count() {
        let serial = source_field(1, 8);
        for workers in [2, 4, 8] {
            assert_eq!(source_field(workers, 8).data, serial.data, "{workers} workers");
        }
    }
}
