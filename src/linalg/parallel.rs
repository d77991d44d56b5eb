//! Block-recursive parallel dense linear algebra.
//!
//! Every operation is a tree of tasks obtained by halving the leading
//! dimension: an order-`n` problem with `p` workers splits into four
//! `n/2` blocks, half the workers taking the left sub-problem and half
//! the right. A task delegates to the serial kernels of [`super::blas`]
//! once its worker share reaches one or the block falls under
//! [`LEAF_ORDER`]. The join at the end of each scoped-thread region is
//! the synchronization barrier between recursion levels: a task at level
//! `k + 1` only ever reads blocks completed at level `k`.
//!
//! Workers own their scratch: each one carries two square staging tiles,
//! reserved once when the session is created. There is no module-level
//! mutable state.

use std::thread;

use crate::linalg::blas::{Backend, SerialKernel, Side, Trans};
use crate::linalg::dense::{DenseMatrix, MatView, MatViewMut};
use crate::{E, I, NumericError, ResourceError};

/// Blocks at or under this order are handled by a serial kernel.
pub const LEAF_ORDER: I = 32;

/// Largest power of two not exceeding `x` (`x >= 1`).
pub fn pow2_at_most(x: I) -> I {
    debug_assert!(x >= 1);
    1 << (usize::BITS - 1 - x.leading_zeros()) as I
}

/// Runs both closures concurrently; the join is the level barrier.
fn join2<RA, RB, FA, FB>(fa: FA, fb: FB) -> (RA, RB)
where
    FA: FnOnce() -> RA + Send,
    FB: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    thread::scope(|s| {
        let handle = s.spawn(fa);
        let rb = fb();
        (handle.join().expect("worker thread panicked"), rb)
    })
}

/// Parallel loop over `out`, handing each element and its index to `f`.
/// The index ranges given to the workers are disjoint; the join at the
/// end of the scope is the barrier.
pub fn par_for_each_mut<T, F>(workers: I, out: &mut [T], f: F)
where
    T: Send,
    F: Fn(I, &mut T) + Sync,
{
    let n = out.len();
    if n == 0 {
        return;
    }
    let workers = workers.clamp(1, n);
    if workers == 1 {
        for (i, v) in out.iter_mut().enumerate() {
            f(i, v);
        }
        return;
    }
    thread::scope(|s| {
        let f = &f;
        let mut rest = out;
        let mut start = 0;
        for w in 0..workers {
            let end = (w + 1) * n / workers;
            let (chunk, tail) = rest.split_at_mut(end - start);
            rest = tail;
            s.spawn(move || {
                for (k, v) in chunk.iter_mut().enumerate() {
                    f(start + k, v);
                }
            });
            start = end;
        }
    });
}

/// Two staging tiles owned by one worker.
struct WorkerScratch {
    a: Vec<E>,
    b: Vec<E>,
}

impl WorkerScratch {
    fn reserve(order: I) -> Result<Self, ResourceError> {
        let elems = order * order;
        let mut a = Vec::new();
        let mut b = Vec::new();
        a.try_reserve_exact(elems)
            .map_err(|_| ResourceError::ScratchArena)?;
        b.try_reserve_exact(elems)
            .map_err(|_| ResourceError::ScratchArena)?;
        a.resize(elems, 0.0);
        b.resize(elems, 0.0);
        Ok(Self { a, b })
    }
}

/// A linear-algebra session: the injected serial backend, a power-of-two
/// worker count and the per-worker scratch arena.
pub struct LinalgContext {
    backend: Backend,
    scratch: Vec<WorkerScratch>,
}

impl LinalgContext {
    /// Reserves the scratch arena for `threads` workers operating on
    /// matrices up to order `max_order`. The worker count is rounded
    /// down to a power of two.
    pub fn new(threads: I, max_order: I, backend: Backend) -> Result<Self, ResourceError> {
        let workers = pow2_at_most(threads.max(1));
        let order = max_order.max(1);
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(workers)
            .map_err(|_| ResourceError::ScratchArena)?;
        for _ in 0..workers {
            scratch.push(WorkerScratch::reserve(order)?);
        }
        Ok(Self { backend, scratch })
    }

    pub fn workers(&self) -> I {
        self.scratch.len()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// In-place parallel Cholesky factorization: the lower triangle
    /// receives `L`, the strict upper triangle is zeroed.
    pub fn cholesky(&mut self, a: MatViewMut<'_>) -> Result<(), NumericError> {
        cholesky_rec(&self.backend, a, &mut self.scratch)
    }

    /// Like [`Self::cholesky`], with the worker count additionally capped
    /// at the largest power of two not exceeding `cap`.
    pub fn cholesky_capped(&mut self, a: MatViewMut<'_>, cap: I) -> Result<(), NumericError> {
        let workers = pow2_at_most(self.scratch.len().min(cap.max(1)));
        cholesky_rec(&self.backend, a, &mut self.scratch[..workers])
    }

    /// In-place parallel inverse of a lower-triangular matrix.
    pub fn triangle_inverse(&mut self, l: MatViewMut<'_>) {
        trinv_rec(&self.backend, l, &mut self.scratch)
    }

    /// Parallel `C ← α·op(A)·op(B) + β·C`.
    pub fn gemm(
        &mut self,
        alpha: E,
        a: MatView<'_>,
        ta: Trans,
        b: MatView<'_>,
        tb: Trans,
        beta: E,
        c: MatViewMut<'_>,
    ) {
        gemm_rec(&self.backend, alpha, a, ta, b, tb, beta, c, &mut self.scratch)
    }

    /// Parallel symmetric rank-k update `C ← α·A·Aᵀ + β·C` (full result).
    pub fn syrk(&mut self, alpha: E, a: MatView<'_>, beta: E, mut c: MatViewMut<'_>) {
        syrk_rec(&self.backend, alpha, a, beta, c.rb(), &mut self.scratch);
        mirror_lower(c);
    }

    /// Solves the symmetric positive-definite system `A·x = b`.
    ///
    /// `A` is destroyed (it receives its Cholesky factor). The factor is
    /// computed in parallel by at most `cap` workers (rounded down to a
    /// power of two); the substitution pass on the right-hand side is a
    /// single-threaded section.
    pub fn spd_solve(
        &mut self,
        a: &mut DenseMatrix,
        b: &[E],
        x: &mut [E],
        cap: I,
    ) -> Result<(), NumericError> {
        let n = a.rows();
        debug_assert!(b.len() >= n && x.len() >= n);
        let workers = pow2_at_most(self.scratch.len().min(cap.max(1)));
        if workers <= 1 || n <= LEAF_ORDER {
            self.backend.potrf(a.as_view_mut())?;
        } else {
            cholesky_rec(&self.backend, a.as_view_mut(), &mut self.scratch[..workers])?;
        }
        x[..n].copy_from_slice(&b[..n]);
        self.backend.potrs(a.as_view(), &mut x[..n]);
        Ok(())
    }
}

fn mirror_lower(mut c: MatViewMut<'_>) {
    for j in 1..c.cols() {
        for i in 0..j {
            let v = c.get(j, i);
            c.set(i, j, v);
        }
    }
}

/// Stages `src` into the first `rows * cols` elements of `tile` and
/// returns the staged mutable view.
fn stage<'t>(tile: &'t mut [E], src: MatView<'_>) -> MatViewMut<'t> {
    let (rows, cols) = (src.rows(), src.cols());
    let mut staged = MatViewMut::from_slice(&mut tile[..rows * cols], rows, cols);
    staged.copy_from(src);
    staged
}

fn cholesky_rec(
    backend: &Backend,
    mut a: MatViewMut<'_>,
    scratch: &mut [WorkerScratch],
) -> Result<(), NumericError> {
    let n = a.rows();
    if n == 0 {
        return Ok(());
    }
    if scratch.len() <= 1 || n <= LEAF_ORDER {
        let tile = &mut scratch[0].a;
        let mut staged = stage(tile, a.as_view());
        backend.potrf(staged.rb())?;
        a.copy_from(staged.as_view());
        return Ok(());
    }

    let n1 = n.div_ceil(2);
    let (mut a11, a12, mut a21, mut a22) = a.split_quad(n1, n1);

    cholesky_rec(backend, a11.rb(), scratch)?;

    // W ← L11⁻¹, staged outside the factor.
    let mut w = DenseMatrix::zeros(n1, n1);
    copy_par(a11.as_view(), w.as_view_mut(), scratch.len());
    trinv_rec(backend, w.as_view_mut(), scratch);

    // A21 ← A21·L11⁻ᵀ
    trmm_par(
        backend,
        Side::Right,
        Trans::Yes,
        1.0,
        w.as_view(),
        a21.rb(),
        scratch,
    );

    // A22 ← A22 − A21·A21ᵀ (lower blocks; the upper is zeroed as the
    // recursion factors A22).
    syrk_rec(backend, -1.0, a21.as_view(), 1.0, a22.rb(), scratch);

    zero_par(a12, scratch.len());

    cholesky_rec(backend, a22, scratch)
}

fn trinv_rec(backend: &Backend, l: MatViewMut<'_>, scratch: &mut [WorkerScratch]) {
    let n = l.rows();
    if n == 0 {
        return;
    }
    if scratch.len() <= 1 || n <= LEAF_ORDER {
        let tile = &mut scratch[0].a;
        let mut staged = stage(tile, l.as_view());
        backend.trtri(staged.rb());
        let mut l = l;
        l.copy_from(staged.as_view());
        return;
    }

    let n1 = n.div_ceil(2);
    let (mut l11, _, mut l21, mut l22) = l.split_quad(n1, n1);

    // Invert the diagonal blocks concurrently, half the workers each.
    {
        let (s1, s2) = scratch.split_at_mut(scratch.len() / 2);
        join2(
            || trinv_rec(backend, l11.rb(), s1),
            || trinv_rec(backend, l22.rb(), s2),
        );
    }

    // L21 ← −L22⁻¹·L21·L11⁻¹
    trmm_par(
        backend,
        Side::Right,
        Trans::No,
        -1.0,
        l11.as_view(),
        l21.rb(),
        scratch,
    );
    trmm_par(
        backend,
        Side::Left,
        Trans::No,
        1.0,
        l22.as_view(),
        l21,
        scratch,
    );
}

fn trmm_par(
    backend: &Backend,
    side: Side,
    trans: Trans,
    alpha: E,
    l: MatView<'_>,
    mut b: MatViewMut<'_>,
    scratch: &mut [WorkerScratch],
) {
    if b.rows() == 0 || b.cols() == 0 {
        return;
    }
    let splittable = match side {
        // The triangular operand acts on the rows; split the columns.
        Side::Left => b.cols() > 1,
        Side::Right => b.rows() > 1,
    };
    if scratch.len() <= 1 || !splittable {
        let worker = &mut scratch[0];
        let staged_l = stage(&mut worker.a, l);
        let mut staged_b = stage(&mut worker.b, b.as_view());
        backend.trmm(side, trans, alpha, staged_l.as_view(), staged_b.rb());
        b.copy_from(staged_b.as_view());
        return;
    }

    let (b1, b2) = match side {
        Side::Left => {
            let at = b.cols() / 2;
            b.split_cols(at)
        }
        Side::Right => {
            let at = b.rows() / 2;
            b.split_rows(at)
        }
    };
    let (s1, s2) = scratch.split_at_mut(scratch.len() / 2);
    join2(
        || trmm_par(backend, side, trans, alpha, l, b1, s1),
        || trmm_par(backend, side, trans, alpha, l, b2, s2),
    );
}

#[allow(clippy::too_many_arguments)]
fn gemm_rec(
    backend: &Backend,
    alpha: E,
    a: MatView<'_>,
    ta: Trans,
    b: MatView<'_>,
    tb: Trans,
    beta: E,
    mut c: MatViewMut<'_>,
    scratch: &mut [WorkerScratch],
) {
    let (m, n) = (c.rows(), c.cols());
    if m == 0 || n == 0 {
        return;
    }
    if scratch.len() <= 1 || (m <= LEAF_ORDER && n <= LEAF_ORDER) || (m == 1 && n == 1) {
        let tile = &mut scratch[0].b;
        let mut staged = stage(tile, c.as_view());
        backend.gemm(alpha, a, ta, b, tb, beta, staged.rb());
        c.copy_from(staged.as_view());
        return;
    }

    let (s1, s2) = scratch.split_at_mut(scratch.len() / 2);
    if m >= n {
        let m1 = m.div_ceil(2);
        let (a1, a2) = match ta {
            Trans::No => a.split_rows(m1),
            Trans::Yes => a.split_cols(m1),
        };
        let (c1, c2) = c.split_rows(m1);
        join2(
            || gemm_rec(backend, alpha, a1, ta, b, tb, beta, c1, s1),
            || gemm_rec(backend, alpha, a2, ta, b, tb, beta, c2, s2),
        );
    } else {
        let n1 = n.div_ceil(2);
        let (b1, b2) = match tb {
            Trans::No => b.split_cols(n1),
            Trans::Yes => b.split_rows(n1),
        };
        let (c1, c2) = c.split_cols(n1);
        join2(
            || gemm_rec(backend, alpha, a, ta, b1, tb, beta, c1, s1),
            || gemm_rec(backend, alpha, a, ta, b2, tb, beta, c2, s2),
        );
    }
}

/// Lower-triangle symmetric rank-k recursion; the strict upper part of
/// `c` is left untouched.
fn syrk_rec(
    backend: &Backend,
    alpha: E,
    a: MatView<'_>,
    beta: E,
    c: MatViewMut<'_>,
    scratch: &mut [WorkerScratch],
) {
    let m = c.rows();
    if m == 0 {
        return;
    }
    if scratch.len() <= 1 || m <= LEAF_ORDER {
        let tile = &mut scratch[0].b;
        let mut staged = stage(tile, c.as_view());
        backend.syrk(alpha, a, beta, staged.rb());
        let mut c = c;
        c.copy_from(staged.as_view());
        return;
    }

    let m1 = m.div_ceil(2);
    let (a1, a2) = a.split_rows(m1);
    let (c11, _, c21, c22) = c.split_quad(m1, m1);

    {
        let (s1, s2) = scratch.split_at_mut(scratch.len() / 2);
        join2(
            || syrk_rec(backend, alpha, a1, beta, c11, s1),
            || syrk_rec(backend, alpha, a2, beta, c22, s2),
        );
    }

    // Off-diagonal block with the full worker set.
    gemm_rec(backend, alpha, a2, Trans::No, a1, Trans::Yes, beta, c21, scratch);
}

fn copy_par(src: MatView<'_>, dst: MatViewMut<'_>, workers: I) {
    let cols = dst.cols();
    if cols == 0 || dst.rows() == 0 {
        return;
    }
    let workers = workers.clamp(1, cols);
    if workers == 1 {
        let mut dst = dst;
        dst.copy_from(src);
        return;
    }
    thread::scope(|s| {
        let mut rest = dst;
        let mut start = 0;
        for w in 0..workers {
            let end = (w + 1) * cols / workers;
            let (mut chunk, tail) = rest.split_cols(end - start);
            let src_chunk = src.submatrix(0, start, src.rows(), end - start);
            rest = tail;
            s.spawn(move || chunk.copy_from(src_chunk));
            start = end;
        }
    });
}

fn zero_par(b: MatViewMut<'_>, workers: I) {
    let cols = b.cols();
    if cols == 0 || b.rows() == 0 {
        return;
    }
    let workers = workers.clamp(1, cols);
    if workers == 1 {
        let mut b = b;
        b.fill(0.0);
        return;
    }
    thread::scope(|s| {
        let mut rest = b;
        let mut start = 0;
        for w in 0..workers {
            let end = (w + 1) * cols / workers;
            let (mut chunk, tail) = rest.split_cols(end - start);
            rest = tail;
            s.spawn(move || chunk.fill(0.0));
            start = end;
        }
    });
}
