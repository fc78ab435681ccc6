// src/stencil.rs
//
// Fixed-weight 27-point operators on periodic 3D grids.
//
// Every kernel here:
//   - reads interior cells plus the one-cell halo of its inputs,
//   - writes interior cells of its output only (the output halo is left stale),
//   - is parallelised over z-planes of the output with rayon.
//
// Sums are grouped the same way as the NPB reference kernels (partial sums of the
// four y/z neighbours per row, reused across the x sweep). Each output cell depends only
// on its own neighbourhood, so results are bit-identical for any decomposition as long
// as the inputs' halos hold the right neighbour values.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::grid::Grid3D;

/// Weights of a symmetric 27-point stencil, grouped by distance class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stencil27 {
    /// The cell itself.
    pub center: f64,
    /// The 6 face neighbours.
    pub face: f64,
    /// The 12 edge neighbours.
    pub edge: f64,
    /// The 8 corner neighbours.
    pub corner: f64,
}

impl Stencil27 {
    pub const fn new(center: f64, face: f64, edge: f64, corner: f64) -> Self {
        Self {
            center,
            face,
            edge,
            corner,
        }
    }

    /// Sum of all 27 weights (zero for a consistent Laplacian).
    pub fn weight_sum(&self) -> f64 {
        self.center + 6.0 * self.face + 12.0 * self.edge + 8.0 * self.corner
    }

    pub fn negated(&self) -> Self {
        Self::new(-self.center, -self.face, -self.edge, -self.corner)
    }

    pub fn is_finite(&self) -> bool {
        [self.center, self.face, self.edge, self.corner]
            .iter()
            .all(|w| w.is_finite())
    }
}

/// Discrete operator `A` of the benchmark.
pub const OPERATOR_A: Stencil27 = Stencil27::new(-8.0 / 3.0, 0.0, 1.0 / 6.0, 1.0 / 12.0);

/// Smoother for classes S, W and A.
pub const SMOOTHER_SMALL: Stencil27 = Stencil27::new(-3.0 / 8.0, 1.0 / 32.0, -1.0 / 64.0, 0.0);

/// Smoother for classes B and larger.
pub const SMOOTHER_LARGE: Stencil27 = Stencil27::new(-3.0 / 17.0, 1.0 / 33.0, -1.0 / 61.0, 0.0);

/// Operator and smoother used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StencilCoefficients {
    pub operator: Stencil27,
    pub smoother: Stencil27,
}

impl StencilCoefficients {
    pub const fn npb_small() -> Self {
        Self {
            operator: OPERATOR_A,
            smoother: SMOOTHER_SMALL,
        }
    }

    pub const fn npb_large() -> Self {
        Self {
            operator: OPERATOR_A,
            smoother: SMOOTHER_LARGE,
        }
    }

    /// 7-point Laplacian with a weighted Jacobi smoother.
    pub fn seven_point(omega: f64) -> Self {
        Self {
            operator: Stencil27::new(-6.0, 1.0, 0.0, 0.0),
            smoother: Stencil27::new(-omega / 6.0, 0.0, 0.0, 0.0),
        }
    }
}

/// Which relaxation family a coefficient set was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StencilKind {
    /// Full 27-point operator with the NPB smoother.
    TwentySevenPoint,
    /// Face neighbours only.
    SevenPoint,
}

impl StencilCoefficients {
    pub fn kind(&self) -> StencilKind {
        let op = &self.operator;
        let sm = &self.smoother;
        if op.edge == 0.0 && op.corner == 0.0 && sm.edge == 0.0 && sm.corner == 0.0 {
            StencilKind::SevenPoint
        } else {
            StencilKind::TwentySevenPoint
        }
    }
}

impl fmt::Display for StencilKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StencilKind::TwentySevenPoint => write!(f, "27-point"),
            StencilKind::SevenPoint => write!(f, "7-point"),
        }
    }
}

/// `r = v - A u` on interior cells.
pub fn residual(u: &Grid3D, v: &Grid3D, r: &mut Grid3D, a: &Stencil27) {
    debug_assert_eq!(u.extents(), v.extents());
    apply_residual(u, Some(v), r, a);
}

/// `r = r - A u` on interior cells (the level's right-hand side is already in `r`).
pub fn residual_in_place(u: &Grid3D, r: &mut Grid3D, a: &Stencil27) {
    apply_residual(u, None, r, a);
}

fn apply_residual(u: &Grid3D, v: Option<&Grid3D>, r: &mut Grid3D, a: &Stencil27) {
    debug_assert_eq!(u.extents(), r.extents());
    let (n1, n2, n3) = (u.n1, u.n2, u.n3);
    let m1 = u.m1();
    let plane = u.plane_len();
    let ud: &[f64] = &u.data;
    let vd: Option<&[f64]> = v.map(|g| g.data.as_slice());

    r.data
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(k, r_plane)| {
            if k == 0 || k > n3 {
                return;
            }
            let mut u1 = vec![0.0f64; m1];
            let mut u2 = vec![0.0f64; m1];
            let kb = k * plane;

            for j in 1..=n2 {
                let b = kb + j * m1;
                for i in 0..m1 {
                    let c = b + i;
                    u1[i] = ud[c - m1] + ud[c + m1] + ud[c - plane] + ud[c + plane];
                    u2[i] = ud[c - m1 - plane]
                        + ud[c + m1 - plane]
                        + ud[c - m1 + plane]
                        + ud[c + m1 + plane];
                }
                let row = j * m1;
                for i in 1..=n1 {
                    let c = b + i;
                    let rhs = match vd {
                        Some(vd) => vd[c],
                        None => r_plane[row + i],
                    };
                    r_plane[row + i] = rhs
                        - a.center * ud[c]
                        - a.face * (ud[c - 1] + ud[c + 1] + u1[i])
                        - a.edge * (u2[i] + u1[i - 1] + u1[i + 1])
                        - a.corner * (u2[i - 1] + u2[i + 1]);
                }
            }
        });
}

/// One smoothing sweep: `u = u + S r` on interior cells.
pub fn apply_smoother(r: &Grid3D, u: &mut Grid3D, s: &Stencil27) {
    debug_assert_eq!(u.extents(), r.extents());
    let (n1, n2, n3) = (u.n1, u.n2, u.n3);
    let m1 = u.m1();
    let plane = u.plane_len();
    let rd: &[f64] = &r.data;

    u.data
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(k, u_plane)| {
            if k == 0 || k > n3 {
                return;
            }
            let mut r1 = vec![0.0f64; m1];
            let mut r2 = vec![0.0f64; m1];
            let kb = k * plane;

            for j in 1..=n2 {
                let b = kb + j * m1;
                for i in 0..m1 {
                    let c = b + i;
                    r1[i] = rd[c - m1] + rd[c + m1] + rd[c - plane] + rd[c + plane];
                    r2[i] = rd[c - m1 - plane]
                        + rd[c + m1 - plane]
                        + rd[c - m1 + plane]
                        + rd[c + m1 + plane];
                }
                let row = j * m1;
                for i in 1..=n1 {
                    let c = b + i;
                    u_plane[row + i] = u_plane[row + i]
                        + s.center * rd[c]
                        + s.face * (rd[c - 1] + rd[c + 1] + r1[i])
                        + s.edge * (r2[i] + r1[i - 1] + r1[i + 1])
                        + s.corner * (r2[i - 1] + r2[i + 1]);
                }
            }
        });
}

/// Full-weighting restriction of `fine` onto `coarse` (overwrites the coarse interior).
///
/// Coarse cell `c` is centred on fine cell `2c`; weights are 1/2 (centre), 1/4 (faces),
/// 1/8 (edges), 1/16 (corners). The factor of 4 over plain averaging carries the h²
/// scaling of the coarser operator.
pub fn restrict(fine: &Grid3D, coarse: &mut Grid3D) {
    debug_assert_eq!(fine.n1, 2 * coarse.n1);
    debug_assert_eq!(fine.n2, 2 * coarse.n2);
    debug_assert_eq!(fine.n3, 2 * coarse.n3);

    let (nc1, nc2, nc3) = (coarse.n1, coarse.n2, coarse.n3);
    let mc1 = coarse.m1();
    let cplane = coarse.plane_len();
    let m1 = fine.m1();
    let p = fine.plane_len();
    let rd: &[f64] = &fine.data;

    coarse
        .data
        .par_chunks_mut(cplane)
        .enumerate()
        .for_each(|(j3, s_plane)| {
            if j3 == 0 || j3 > nc3 {
                return;
            }
            let mut x1 = vec![0.0f64; m1];
            let mut y1 = vec![0.0f64; m1];
            let i3 = 2 * j3;

            for j2 in 1..=nc2 {
                let i2 = 2 * j2;
                let b = i2 * m1 + i3 * p;

                for j1 in 1..=nc1 + 1 {
                    let i1 = 2 * j1 - 1;
                    let q = b + i1;
                    x1[i1] = rd[q - m1] + rd[q + m1] + rd[q - p] + rd[q + p];
                    y1[i1] = rd[q - m1 - p] + rd[q - m1 + p] + rd[q + m1 - p] + rd[q + m1 + p];
                }

                let row = j2 * mc1;
                for j1 in 1..=nc1 {
                    let i1 = 2 * j1;
                    let q = b + i1;
                    let y2 = rd[q - m1 - p] + rd[q - m1 + p] + rd[q + m1 - p] + rd[q + m1 + p];
                    let x2 = rd[q - m1] + rd[q + m1] + rd[q - p] + rd[q + p];
                    s_plane[row + j1] = 0.5 * rd[q]
                        + 0.25 * (rd[q - 1] + rd[q + 1] + x2)
                        + 0.125 * (x1[i1 - 1] + x1[i1 + 1] + y2)
                        + 0.0625 * (y1[i1 - 1] + y1[i1 + 1]);
                }
            }
        });
}

/// Trilinear interpolation of `coarse` added into the interior of `fine`.
///
/// Fine cell `f = 2c + o` takes the coarse value at `c` along axes with `o = 0` and the
/// mean of `c` and `c + 1` along axes with `o = 1`.
pub fn prolongate_add(coarse: &Grid3D, fine: &mut Grid3D) {
    debug_assert_eq!(fine.n1, 2 * coarse.n1);
    debug_assert_eq!(fine.n2, 2 * coarse.n2);
    debug_assert_eq!(fine.n3, 2 * coarse.n3);

    let (nf1, nf2, nf3) = (fine.n1, fine.n2, fine.n3);
    let mf1 = fine.m1();
    let fplane = fine.plane_len();
    let mc1 = coarse.m1();
    let cplane = coarse.plane_len();
    let zd: &[f64] = &coarse.data;

    fine.data
        .par_chunks_mut(fplane)
        .enumerate()
        .for_each(|(f3, u_plane)| {
            if f3 == 0 || f3 > nf3 {
                return;
            }
            let (c3, o3) = (f3 / 2, f3 & 1);
            let mut z1 = vec![0.0f64; mc1];
            let mut z2 = vec![0.0f64; mc1];
            let mut z3 = vec![0.0f64; mc1];

            for f2 in 1..=nf2 {
                let (c2, o2) = (f2 / 2, f2 & 1);
                // Row (c2, c3) and its +y, +z, +yz neighbours in the coarse grid.
                let b = c2 * mc1 + c3 * cplane;
                let by = b + mc1;
                let bz = b + cplane;
                let byz = by + cplane;
                for c1 in 0..mc1 {
                    z1[c1] = zd[by + c1] + zd[b + c1];
                    z2[c1] = zd[bz + c1] + zd[b + c1];
                    z3[c1] = zd[byz + c1] + zd[bz + c1] + z1[c1];
                }

                let row = f2 * mf1;
                for f1 in 1..=nf1 {
                    let (c1, o1) = (f1 / 2, f1 & 1);
                    let val = match (o2, o3, o1) {
                        (0, 0, 0) => zd[b + c1],
                        (0, 0, _) => 0.5 * (zd[b + c1 + 1] + zd[b + c1]),
                        (1, 0, 0) => 0.5 * z1[c1],
                        (1, 0, _) => 0.25 * (z1[c1] + z1[c1 + 1]),
                        (0, 1, 0) => 0.5 * z2[c1],
                        (0, 1, _) => 0.25 * (z2[c1] + z2[c1 + 1]),
                        (_, _, 0) => 0.25 * z3[c1],
                        (_, _, _) => 0.125 * (z3[c1] + z3[c1 + 1]),
                    };
                    u_plane[row + f1] += val;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::fill_periodic;

    fn constant_grid(n: usize, value: f64) -> Grid3D {
        let mut g = Grid3D::new(n, n, n);
        g.data.fill(value);
        g
    }

    fn pseudo_random_grid(n: usize, seed: u64) -> Grid3D {
        let mut g = Grid3D::new(n, n, n);
        let mut s = seed;
        for k in 1..=n {
            for j in 1..=n {
                for i in 1..=n {
                    s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    g.set(i, j, k, ((s >> 11) as f64) / ((1u64 << 53) as f64) - 0.5);
                }
            }
        }
        fill_periodic(&mut g);
        g
    }

    #[test]
    fn operator_a_annihilates_constants() {
        // -8/3 + 12/6 + 8/12 is zero up to rounding.
        assert!(OPERATOR_A.weight_sum().abs() < 1e-15);
        let u = constant_grid(4, 3.0);
        let v = constant_grid(4, 0.25);
        let mut r = Grid3D::new(4, 4, 4);
        residual(&u, &v, &mut r, &OPERATOR_A);
        for x in r.interior_to_vec() {
            assert!((x - 0.25).abs() < 1e-14, "{x}");
        }
    }

    #[test]
    fn residual_in_place_matches_out_of_place() {
        let u = pseudo_random_grid(6, 1);
        let v = pseudo_random_grid(6, 2);
        let mut r_out = Grid3D::new(6, 6, 6);
        residual(&u, &v, &mut r_out, &OPERATOR_A);

        let mut r_in = v.clone();
        residual_in_place(&u, &mut r_in, &OPERATOR_A);
        assert_eq!(r_out.interior_to_vec(), r_in.interior_to_vec());
    }

    #[test]
    fn residual_of_single_spike_spreads_operator_weights() {
        let mut u = Grid3D::new(4, 4, 4);
        u.set(2, 2, 2, 1.0);
        fill_periodic(&mut u);
        let v = Grid3D::new(4, 4, 4);
        let mut r = Grid3D::new(4, 4, 4);
        residual(&u, &v, &mut r, &OPERATOR_A);
        assert_eq!(r.get(2, 2, 2), -OPERATOR_A.center);
        assert_eq!(r.get(3, 2, 2), -OPERATOR_A.face);
        assert_eq!(r.get(3, 3, 2), -OPERATOR_A.edge);
        assert_eq!(r.get(1, 3, 1), -OPERATOR_A.corner);
        assert_eq!(r.get(4, 4, 4), 0.0);
    }

    #[test]
    fn smoother_adds_weighted_neighbourhood() {
        let mut r = Grid3D::new(4, 4, 4);
        r.set(2, 2, 2, 1.0);
        fill_periodic(&mut r);
        let mut u = constant_grid(4, 1.0);
        apply_smoother(&r, &mut u, &SMOOTHER_SMALL);
        assert_eq!(u.get(2, 2, 2), 1.0 + SMOOTHER_SMALL.center);
        assert_eq!(u.get(2, 1, 2), 1.0 + SMOOTHER_SMALL.face);
        assert_eq!(u.get(1, 1, 2), 1.0 + SMOOTHER_SMALL.edge);
        assert_eq!(u.get(4, 4, 4), 1.0);
    }

    #[test]
    fn restrict_then_prolongate_zero_is_zero() {
        let fine = Grid3D::new(8, 8, 8);
        let mut coarse = Grid3D::new(4, 4, 4);
        restrict(&fine, &mut coarse);
        fill_periodic(&mut coarse);
        let mut back = Grid3D::new(8, 8, 8);
        prolongate_add(&coarse, &mut back);
        assert!(coarse.data.iter().all(|&x| x == 0.0));
        assert!(back.data.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn restriction_scales_constants_by_four() {
        let fine = constant_grid(8, 1.0);
        let mut coarse = Grid3D::new(4, 4, 4);
        restrict(&fine, &mut coarse);
        for x in coarse.interior_to_vec() {
            assert_eq!(x, 4.0);
        }
    }

    #[test]
    fn prolongation_reproduces_constants_and_adds() {
        let coarse = constant_grid(4, 2.0);
        let mut fine = constant_grid(8, 1.0);
        prolongate_add(&coarse, &mut fine);
        for x in fine.interior_to_vec() {
            assert_eq!(x, 3.0);
        }
    }

    #[test]
    fn prolongation_is_linear_between_coarse_centres() {
        // Coarse field linear in x (periodic wrap aside): f = 2c copies, f = 2c+1 averages.
        let mut coarse = Grid3D::new(4, 4, 4);
        for k in 1..=4 {
            for j in 1..=4 {
                for i in 1..=4 {
                    coarse.set(i, j, k, i as f64);
                }
            }
        }
        fill_periodic(&mut coarse);
        let mut fine = Grid3D::new(8, 8, 8);
        prolongate_add(&coarse, &mut fine);
        assert_eq!(fine.get(2, 2, 2), 1.0);
        assert_eq!(fine.get(3, 2, 2), 1.5);
        assert_eq!(fine.get(4, 4, 4), 2.0);
        assert_eq!(fine.get(5, 5, 5), 2.5);
    }

    #[test]
    fn seven_point_set_is_recognised() {
        assert_eq!(StencilCoefficients::seven_point(0.8).kind(), StencilKind::SevenPoint);
        assert_eq!(
            StencilCoefficients::npb_large().kind(),
            StencilKind::TwentySevenPoint
        );
        assert_eq!(StencilCoefficients::npb_small().kind().to_string(), "27-point");
        assert_eq!(StencilKind::SevenPoint.to_string(), "7-point");
    }
}
