// src/grid.rs

use rayon::prelude::*;

/// Width of the ghost border around every grid block.
pub const HALO: usize = 1;

/// 3D block of cell values with a one-cell halo on each side.
///
/// Interior cells are addressed with indices `1..=n` on each axis; index `0` and
/// `n + 1` are halo cells. Storage is x-fastest over the padded extents.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid3D {
    pub n1: usize,
    pub n2: usize,
    pub n3: usize,
    pub data: Vec<f64>,
}

impl Grid3D {
    /// Zero-initialised grid with `n1 × n2 × n3` interior cells.
    pub fn new(n1: usize, n2: usize, n3: usize) -> Self {
        let len = (n1 + 2 * HALO) * (n2 + 2 * HALO) * (n3 + 2 * HALO);
        Self {
            n1,
            n2,
            n3,
            data: vec![0.0; len],
        }
    }

    /// Placeholder for levels a worker does not own.
    pub fn empty() -> Self {
        Self {
            n1: 0,
            n2: 0,
            n3: 0,
            data: Vec::new(),
        }
    }

    pub fn extents(&self) -> [usize; 3] {
        [self.n1, self.n2, self.n3]
    }

    /// Padded extent along x (one row).
    #[inline]
    pub fn m1(&self) -> usize {
        self.n1 + 2 * HALO
    }

    #[inline]
    pub fn m2(&self) -> usize {
        self.n2 + 2 * HALO
    }

    #[inline]
    pub fn m3(&self) -> usize {
        self.n3 + 2 * HALO
    }

    /// Values in one padded z-plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.m1() * self.m2()
    }

    pub fn n_interior(&self) -> usize {
        self.n1 * self.n2 * self.n3
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of (i, j, k) in padded coordinates.
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.m1() && j < self.m2() && k < self.m3());
        i + self.m1() * (j + self.m2() * k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: f64) {
        let id = self.idx(i, j, k);
        self.data[id] = v;
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Copy values from a grid of identical shape.
    pub fn copy_from(&mut self, other: &Grid3D) {
        debug_assert_eq!(self.extents(), other.extents());
        self.data.copy_from_slice(&other.data);
    }

    /// Interior values in (k, j, i) order.
    pub fn interior_to_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_interior());
        for k in 1..=self.n3 {
            for j in 1..=self.n2 {
                let base = self.idx(1, j, k);
                out.extend_from_slice(&self.data[base..base + self.n1]);
            }
        }
        out
    }

    /// Copy a `[b1, b2, b3]` block of interior values (in (k, j, i) order) into the
    /// interior starting at padded position `at`.
    pub fn write_block(&mut self, at: [usize; 3], extents: [usize; 3], values: &[f64]) {
        let [b1, b2, b3] = extents;
        debug_assert_eq!(values.len(), b1 * b2 * b3);
        for k in 0..b3 {
            for j in 0..b2 {
                let dst = self.idx(at[0], at[1] + j, at[2] + k);
                let src = (k * b2 + j) * b1;
                self.data[dst..dst + b1].copy_from_slice(&values[src..src + b1]);
            }
        }
    }

    /// Read a `[b1, b2, b3]` block of values starting at padded position `at`.
    pub fn read_block(&self, at: [usize; 3], extents: [usize; 3]) -> Vec<f64> {
        let [b1, b2, b3] = extents;
        let mut out = Vec::with_capacity(b1 * b2 * b3);
        for k in 0..b3 {
            for j in 0..b2 {
                let src = self.idx(at[0], at[1] + j, at[2] + k);
                out.extend_from_slice(&self.data[src..src + b1]);
            }
        }
        out
    }

    /// Add interior values (in (k, j, i) order) into the interior.
    pub fn add_interior(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.n_interior());
        let n1 = self.n1;
        let mut src = 0;
        for k in 1..=self.n3 {
            for j in 1..=self.n2 {
                let base = self.idx(1, j, k);
                for (dst, v) in self.data[base..base + n1]
                    .iter_mut()
                    .zip(&values[src..src + n1])
                {
                    *dst += v;
                }
                src += n1;
            }
        }
    }

    /// Sum of squares and max-abs over interior cells.
    ///
    /// Each z-plane is reduced independently and the partial sums are added in plane
    /// order, so the result does not depend on how rayon schedules the planes.
    pub fn interior_norm_terms(&self) -> (f64, f64) {
        if self.n_interior() == 0 {
            return (0.0, 0.0);
        }
        let plane = self.plane_len();
        let (m1, n1, n2, n3) = (self.m1(), self.n1, self.n2, self.n3);

        let partials: Vec<(f64, f64)> = self
            .data
            .par_chunks(plane)
            .enumerate()
            .map(|(k, p)| {
                if k == 0 || k > n3 {
                    return (0.0, 0.0);
                }
                let mut s = 0.0f64;
                let mut mx = 0.0f64;
                for j in 1..=n2 {
                    let row = &p[j * m1 + 1..j * m1 + 1 + n1];
                    for &x in row {
                        s += x * x;
                        mx = mx.max(x.abs());
                    }
                }
                (s, mx)
            })
            .collect();

        partials
            .into_iter()
            .fold((0.0, 0.0), |(s, mx), (ps, pm)| (s + ps, mx.max(pm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_indexing_is_consistent() {
        let g = Grid3D::new(4, 3, 2);
        assert_eq!((g.m1(), g.m2(), g.m3()), (6, 5, 4));
        assert_eq!(g.idx(0, 0, 0), 0);
        assert_eq!(g.idx(1, 0, 0), 1);
        assert_eq!(g.idx(0, 1, 0), 6);
        assert_eq!(g.idx(0, 0, 1), 30);
        assert_eq!(g.idx(5, 4, 3), 119); // last padded cell
        assert_eq!(g.data.len(), 120);
        assert_eq!(g.n_interior(), 24);
    }

    #[test]
    fn norm_terms_ignore_halo_cells() {
        let mut g = Grid3D::new(2, 2, 2);
        g.data.fill(100.0);
        for k in 1..=2 {
            for j in 1..=2 {
                for i in 1..=2 {
                    g.set(i, j, k, if (i + j + k) % 2 == 0 { 2.0 } else { -1.0 });
                }
            }
        }
        let (s, mx) = g.interior_norm_terms();
        assert_eq!(s, 4.0 * 4.0 + 4.0 * 1.0);
        assert_eq!(mx, 2.0);
    }

    #[test]
    fn blocks_round_trip_through_interior() {
        let mut g = Grid3D::new(4, 4, 4);
        let block: Vec<f64> = (0..8).map(|v| v as f64).collect();
        g.write_block([3, 1, 2], [2, 2, 2], &block);
        assert_eq!(g.get(3, 1, 2), 0.0);
        assert_eq!(g.get(4, 1, 2), 1.0);
        assert_eq!(g.get(3, 2, 2), 2.0);
        assert_eq!(g.get(4, 2, 3), 7.0);
        assert_eq!(g.read_block([3, 1, 2], [2, 2, 2]), block);

        let before = g.interior_to_vec();
        g.add_interior(&vec![1.0; 64]);
        let after = g.interior_to_vec();
        assert!(before.iter().zip(&after).all(|(a, b)| *b == a + 1.0));
    }
}
