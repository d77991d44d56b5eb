//! Serial BLAS-like primitives.
//!
//! The block recursion in [`super::parallel`] bottoms out on these six
//! single-threaded kernels. Two interchangeable implementations exist:
//! the native loops below and a vendor implementation backed by `faer`,
//! kept strictly sequential since the recursion owns all parallelism.
//! The backend is picked once when the linear-algebra session is
//! created.

use enum_dispatch::enum_dispatch;

use crate::E;
use crate::NumericError;
use crate::linalg::dense::{MatView, MatViewMut};

/// Whether an operand enters a product transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trans {
    No,
    Yes,
}

/// Which side a triangular operand multiplies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// The serial kernel capability.
///
/// Triangular operands are lower-triangular; entries above the diagonal
/// are never read.
#[enum_dispatch]
pub trait SerialKernel {
    /// `C ← α·op(A)·op(B) + β·C`.
    fn gemm(
        &self,
        alpha: E,
        a: MatView<'_>,
        ta: Trans,
        b: MatView<'_>,
        tb: Trans,
        beta: E,
        c: MatViewMut<'_>,
    );

    /// Symmetric rank-k update `C ← α·A·Aᵀ + β·C`, writing the full
    /// (mirrored) result.
    fn syrk(&self, alpha: E, a: MatView<'_>, beta: E, c: MatViewMut<'_>);

    /// In-place triangular product `B ← α·op(L)·B` (`side == Left`) or
    /// `B ← α·B·op(L)` (`side == Right`).
    fn trmm(&self, side: Side, trans: Trans, alpha: E, l: MatView<'_>, b: MatViewMut<'_>);

    /// In-place inverse of a lower-triangular matrix.
    fn trtri(&self, l: MatViewMut<'_>);

    /// In-place Cholesky factorization; on success the lower triangle
    /// holds `L` and the strict upper triangle is zeroed.
    fn potrf(&self, a: MatViewMut<'_>) -> Result<(), NumericError>;

    /// Solves `L·Lᵀ·x = b` in place given the Cholesky factor.
    fn potrs(&self, l: MatView<'_>, b: &mut [E]);
}

/// Hand-written reference kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKernel;

/// `faer`-backed kernels, run with `Par::Seq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerKernel;

/// The injected serial backend.
#[enum_dispatch(SerialKernel)]
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Native(NativeKernel),
    Faer(FaerKernel),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Native(NativeKernel)
    }
}

#[inline]
fn op(m: &MatView<'_>, t: Trans, i: usize, j: usize) -> E {
    match t {
        Trans::No => m.get(i, j),
        Trans::Yes => m.get(j, i),
    }
}

impl SerialKernel for NativeKernel {
    fn gemm(
        &self,
        alpha: E,
        a: MatView<'_>,
        ta: Trans,
        b: MatView<'_>,
        tb: Trans,
        beta: E,
        mut c: MatViewMut<'_>,
    ) {
        let (m, n) = (c.rows(), c.cols());
        let k = match ta {
            Trans::No => a.cols(),
            Trans::Yes => a.rows(),
        };
        for j in 0..n {
            for i in 0..m {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += op(&a, ta, i, p) * op(&b, tb, p, j);
                }
                let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
                c.set(i, j, alpha * acc + prev);
            }
        }
    }

    fn syrk(&self, alpha: E, a: MatView<'_>, beta: E, mut c: MatViewMut<'_>) {
        let (m, k) = (a.rows(), a.cols());
        for j in 0..m {
            for i in j..m {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += a.get(i, p) * a.get(j, p);
                }
                let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
                c.set(i, j, alpha * acc + prev);
            }
        }
        for j in 1..m {
            for i in 0..j {
                let mirrored = c.get(j, i);
                c.set(i, j, mirrored);
            }
        }
    }

    fn trmm(&self, side: Side, trans: Trans, alpha: E, l: MatView<'_>, mut b: MatViewMut<'_>) {
        let (m, n) = (b.rows(), b.cols());
        match (side, trans) {
            // B ← α·L·B: row i of the product needs rows `<= i`, so a
            // descending sweep can work in place.
            (Side::Left, Trans::No) => {
                for j in 0..n {
                    for i in (0..m).rev() {
                        let mut acc = 0.0;
                        for k in 0..=i {
                            acc += l.get(i, k) * b.get(k, j);
                        }
                        b.set(i, j, alpha * acc);
                    }
                }
            }
            // B ← α·Lᵀ·B: row i needs rows `>= i`, ascending sweep.
            (Side::Left, Trans::Yes) => {
                for j in 0..n {
                    for i in 0..m {
                        let mut acc = 0.0;
                        for k in i..m {
                            acc += l.get(k, i) * b.get(k, j);
                        }
                        b.set(i, j, alpha * acc);
                    }
                }
            }
            // B ← α·B·L: column j needs columns `>= j`, ascending sweep.
            (Side::Right, Trans::No) => {
                for j in 0..n {
                    for i in 0..m {
                        let mut acc = 0.0;
                        for k in j..n {
                            acc += b.get(i, k) * l.get(k, j);
                        }
                        b.set(i, j, alpha * acc);
                    }
                }
            }
            // B ← α·B·Lᵀ: column j needs columns `<= j`, descending sweep.
            (Side::Right, Trans::Yes) => {
                for j in (0..n).rev() {
                    for i in 0..m {
                        let mut acc = 0.0;
                        for k in 0..=j {
                            acc += b.get(i, k) * l.get(j, k);
                        }
                        b.set(i, j, alpha * acc);
                    }
                }
            }
        }
    }

    fn trtri(&self, mut l: MatViewMut<'_>) {
        let n = l.rows();
        for j in 0..n {
            let inv_diag = 1.0 / l.get(j, j);
            l.set(j, j, inv_diag);
            for i in j + 1..n {
                let mut acc = 0.0;
                for k in j..i {
                    acc += l.get(i, k) * l.get(k, j);
                }
                l.set(i, j, -acc / l.get(i, i));
            }
        }
    }

    fn potrf(&self, mut a: MatViewMut<'_>) -> Result<(), NumericError> {
        let n = a.rows();
        for j in 0..n {
            let mut diag = a.get(j, j);
            for k in 0..j {
                diag -= a.get(j, k) * a.get(j, k);
            }
            if diag <= 0.0 || !diag.is_finite() {
                return Err(NumericError::NotPositiveDefinite);
            }
            let diag = diag.sqrt();
            a.set(j, j, diag);
            for i in j + 1..n {
                let mut acc = a.get(i, j);
                for k in 0..j {
                    acc -= a.get(i, k) * a.get(j, k);
                }
                a.set(i, j, acc / diag);
            }
        }
        for j in 1..n {
            for i in 0..j {
                a.set(i, j, 0.0);
            }
        }
        Ok(())
    }

    fn potrs(&self, l: MatView<'_>, b: &mut [E]) {
        let n = l.rows();
        for i in 0..n {
            let mut acc = b[i];
            for k in 0..i {
                acc -= l.get(i, k) * b[k];
            }
            b[i] = acc / l.get(i, i);
        }
        for i in (0..n).rev() {
            let mut acc = b[i];
            for k in i + 1..n {
                acc -= l.get(k, i) * b[k];
            }
            b[i] = acc / l.get(i, i);
        }
    }
}

fn to_faer(v: MatView<'_>, t: Trans) -> faer::Mat<E> {
    match t {
        Trans::No => faer::Mat::from_fn(v.rows(), v.cols(), |i, j| v.get(i, j)),
        Trans::Yes => faer::Mat::from_fn(v.cols(), v.rows(), |i, j| v.get(j, i)),
    }
}

fn to_faer_lower(v: MatView<'_>, t: Trans) -> faer::Mat<E> {
    let lower = |i: usize, j: usize| if i >= j { v.get(i, j) } else { 0.0 };
    match t {
        Trans::No => faer::Mat::from_fn(v.rows(), v.cols(), lower),
        Trans::Yes => faer::Mat::from_fn(v.cols(), v.rows(), |i, j| lower(j, i)),
    }
}

impl SerialKernel for FaerKernel {
    fn gemm(
        &self,
        alpha: E,
        a: MatView<'_>,
        ta: Trans,
        b: MatView<'_>,
        tb: Trans,
        beta: E,
        mut c: MatViewMut<'_>,
    ) {
        let a_m = to_faer(a, ta);
        let b_m = to_faer(b, tb);
        let prod = a_m.as_ref() * b_m.as_ref();
        for j in 0..c.cols() {
            for i in 0..c.rows() {
                let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
                c.set(i, j, alpha * prod[(i, j)] + prev);
            }
        }
    }

    fn syrk(&self, alpha: E, a: MatView<'_>, beta: E, mut c: MatViewMut<'_>) {
        let a_m = to_faer(a, Trans::No);
        let prod = a_m.as_ref() * a_m.transpose();
        for j in 0..c.cols() {
            for i in 0..c.rows() {
                let prev = if beta == 0.0 { 0.0 } else { beta * c.get(i, j) };
                c.set(i, j, alpha * prod[(i, j)] + prev);
            }
        }
    }

    fn trmm(&self, side: Side, trans: Trans, alpha: E, l: MatView<'_>, mut b: MatViewMut<'_>) {
        let tri = to_faer_lower(l, trans);
        let b_m = to_faer(b.as_view(), Trans::No);
        let prod = match side {
            Side::Left => tri.as_ref() * b_m.as_ref(),
            Side::Right => b_m.as_ref() * tri.as_ref(),
        };
        for j in 0..b.cols() {
            for i in 0..b.rows() {
                b.set(i, j, alpha * prod[(i, j)]);
            }
        }
    }

    fn trtri(&self, mut l: MatViewMut<'_>) {
        let n = l.rows();
        let tri = to_faer_lower(l.as_view(), Trans::No);
        let mut inv = faer::Mat::<E>::identity(n, n);
        faer::linalg::triangular_solve::solve_lower_triangular_in_place(
            tri.as_ref(),
            inv.as_mut(),
            faer::Par::Seq,
        );
        for j in 0..n {
            for i in 0..n {
                l.set(i, j, inv[(i, j)]);
            }
        }
    }

    fn potrf(&self, mut a: MatViewMut<'_>) -> Result<(), NumericError> {
        let a_m = to_faer(a.as_view(), Trans::No);
        let llt = faer::linalg::solvers::Llt::new(a_m.as_ref(), faer::Side::Lower)
            .map_err(|_| NumericError::NotPositiveDefinite)?;
        let factor = llt.L();
        let n = a.rows();
        for j in 0..n {
            for i in 0..n {
                a.set(i, j, if i >= j { factor[(i, j)] } else { 0.0 });
            }
        }
        Ok(())
    }

    fn potrs(&self, l: MatView<'_>, b: &mut [E]) {
        let n = l.rows();
        let tri = to_faer_lower(l, Trans::No);
        let rhs = faer::MatMut::from_column_major_slice_mut(b, n, 1);
        faer::linalg::triangular_solve::solve_lower_triangular_in_place(
            tri.as_ref(),
            rhs,
            faer::Par::Seq,
        );
        let rhs = faer::MatMut::from_column_major_slice_mut(b, n, 1);
        faer::linalg::triangular_solve::solve_upper_triangular_in_place(
            tri.transpose(),
            rhs,
            faer::Par::Seq,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::dense::DenseMatrix;
    use rstest::rstest;

    fn spd(n: usize) -> DenseMatrix {
        // Diagonally dominant symmetric matrix.
        DenseMatrix::from_fn(n, n, |i, j| {
            if i == j {
                n as E + 1.0
            } else {
                1.0 / (1.0 + (i as E - j as E).abs())
            }
        })
    }

    fn backends() -> [Backend; 2] {
        [Backend::Native(NativeKernel), Backend::Faer(FaerKernel)]
    }

    #[rstest]
    fn potrf_round_trip(#[values(1, 2, 5, 8)] n: usize) {
        for backend in backends() {
            let a = spd(n);
            let mut l = a.clone();
            backend.potrf(l.as_view_mut()).unwrap();

            for i in 0..n {
                for j in 0..n {
                    let mut acc = 0.0;
                    for k in 0..n {
                        acc += l.get(i, k) * l.get(j, k);
                    }
                    assert!((acc - a.get(i, j)).abs() < 1e-10);
                    if i < j {
                        assert_eq!(l.get(i, j), 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn potrf_rejects_indefinite_matrices() {
        for backend in backends() {
            let mut a = DenseMatrix::from_fn(2, 2, |i, j| if i == j { -1.0 } else { 0.0 });
            assert_eq!(
                backend.potrf(a.as_view_mut()),
                Err(NumericError::NotPositiveDefinite)
            );
        }
    }

    #[rstest]
    fn trtri_inverts_the_factor(#[values(1, 3, 7)] n: usize) {
        for backend in backends() {
            let mut l = spd(n);
            backend.potrf(l.as_view_mut()).unwrap();
            let mut inv = l.clone();
            backend.trtri(inv.as_view_mut());

            for i in 0..n {
                for j in 0..n {
                    let mut acc = 0.0;
                    for k in 0..n {
                        acc += l.get(i, k) * inv.get(k, j);
                    }
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((acc - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn gemm_handles_transposes() {
        let a = DenseMatrix::from_fn(2, 3, |i, j| (i * 3 + j) as E);
        let b = DenseMatrix::from_fn(2, 3, |i, j| (10 + i * 3 + j) as E);
        for backend in backends() {
            // C = A·Bᵀ (2×2)
            let mut c = DenseMatrix::zeros(2, 2);
            backend.gemm(
                1.0,
                a.as_view(),
                Trans::No,
                b.as_view(),
                Trans::Yes,
                0.0,
                c.as_view_mut(),
            );
            for i in 0..2 {
                for j in 0..2 {
                    let expected: E = (0..3).map(|k| a.get(i, k) * b.get(j, k)).sum();
                    assert!((c.get(i, j) - expected).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn syrk_matches_gemm() {
        let a = DenseMatrix::from_fn(4, 2, |i, j| (i + j * 4) as E * 0.5);
        for backend in backends() {
            let mut c = DenseMatrix::from_fn(4, 4, |i, j| (i + j) as E);
            let mut reference = c.clone();
            backend.syrk(-1.0, a.as_view(), 1.0, c.as_view_mut());
            backend.gemm(
                -1.0,
                a.as_view(),
                Trans::No,
                a.as_view(),
                Trans::Yes,
                1.0,
                reference.as_view_mut(),
            );
            for i in 0..4 {
                for j in 0..4 {
                    assert!((c.get(i, j) - reference.get(i, j)).abs() < 1e-12);
                }
            }
        }
    }

    #[rstest]
    fn trmm_variants_agree_with_explicit_products(
        #[values(Side::Left, Side::Right)] side: Side,
        #[values(Trans::No, Trans::Yes)] trans: Trans,
    ) {
        let n = 4;
        let mut l = spd(n);
        NativeKernel.potrf(l.as_view_mut()).unwrap();
        let b0 = DenseMatrix::from_fn(n, n, |i, j| (1 + i + 2 * j) as E);

        let mut expected = DenseMatrix::zeros(n, n);
        let (ta, tb) = match side {
            Side::Left => (trans, Trans::No),
            Side::Right => (Trans::No, trans),
        };
        match side {
            Side::Left => NativeKernel.gemm(
                2.0,
                l.as_view(),
                ta,
                b0.as_view(),
                tb,
                0.0,
                expected.as_view_mut(),
            ),
            Side::Right => NativeKernel.gemm(
                2.0,
                b0.as_view(),
                ta,
                l.as_view(),
                tb,
                0.0,
                expected.as_view_mut(),
            ),
        }

        for backend in backends() {
            let mut b = b0.clone();
            backend.trmm(side, trans, 2.0, l.as_view(), b.as_view_mut());
            for i in 0..n {
                for j in 0..n {
                    assert!((b.get(i, j) - expected.get(i, j)).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn potrs_solves_the_system() {
        let n = 6;
        let a = spd(n);
        let mut l = a.clone();
        NativeKernel.potrf(l.as_view_mut()).unwrap();
        let b: Vec<E> = (0..n).map(|i| (i as E) - 2.0).collect();

        for backend in backends() {
            let mut x = b.clone();
            backend.potrs(l.as_view(), &mut x);
            for i in 0..n {
                let ax: E = (0..n).map(|k| a.get(i, k) * x[k]).sum();
                assert!((ax - b[i]).abs() < 1e-10);
            }
        }
    }
}
