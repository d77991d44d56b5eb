//! Inner IRWLS sub-solver on one working set.
//!
//! Repeatedly assembles the KKT system of the working subset, solves it,
//! and re-partitions the subset until the sub-weights settle inside
//! `[0, C]` or the improvement stalls. Returns the best-seen sub-weights
//! (working-set betas plus the bias in the last slot).

use crate::dataset::Dataset;
use crate::full::SampleGroup;
use crate::kernels::Kernel;
use crate::linalg::dense::{DenseMatrix, MatView};
use crate::linalg::parallel::{LinalgContext, par_for_each_mut};
use crate::{E, I, NumericError, TrainProperties};

/// Weight cap: when `e·y` drops under `1/M`, the IRWLS weight is clamped
/// to `C·M` to keep `1/a` bounded away from infinity.
const WEIGHT_CAP: E = 1e4;

const MAX_ITER: I = 1000;
const MIN_ITER: I = 5;
const STALL_LIMIT: I = 5;
const TOLERANCE: E = 1e-6;

pub(super) fn solve(
    dataset: &Dataset,
    props: &TrainProperties,
    kernel: &Kernel<'_>,
    ctx: &mut LinalgContext,
    ws: &[I],
    g_in: &[E],
    e_init: &[E],
    beta_init: &[E],
) -> Result<Vec<E>, NumericError> {
    let n = ws.len();
    let c = props.c;

    let mut a = vec![0.0; n];
    let mut group = vec![SampleGroup::Unbounded; n];
    let mut s1: Vec<I> = Vec::with_capacity(n);
    let mut s3: Vec<I> = Vec::with_capacity(n);

    let mut e = e_init.to_vec();
    let mut beta = beta_init.to_vec();
    let mut beta_new = vec![0.0; n + 1];
    let mut beta_best = vec![0.0; n + 1];

    for i in 0..n {
        let y = dataset.label(ws[i]);
        a[i] = if e[i] * y < 0.0 { 0.0 } else { y * c / e[i] };
        group[i] = SampleGroup::classify(beta[i], e[i], y, c);
        match group[i] {
            SampleGroup::Unbounded => s1.push(i),
            SampleGroup::Bounded => s3.push(i),
            SampleGroup::Inactive => {}
        }
    }

    // The bounded-group influence vector; zero on the first pass, rebuilt
    // at the end of every iteration.
    let mut g13 = vec![0.0; n + 1];

    let (mut max_beta, mut min_beta) = (0.0_f64, 0.0_f64);
    let (mut delta_w, mut norm_w) = (1e9, 1.0);
    let mut best_ratio = 1e9;
    let mut since_best = 0;
    let mut iter = 0;

    while iter < MIN_ITER
        || ((min_beta < 0.0 || max_beta > c)
            && iter < MAX_ITER
            && since_best < STALL_LIMIT
            && delta_w / norm_w > TOLERANCE)
    {
        iter += 1;
        let n1 = s1.len();

        // KKT matrix of the unbounded subset, with the bias row/column.
        let mut h = DenseMatrix::zeros(n1 + 1, n1 + 1);
        {
            let data = h.as_mut_slice();
            let mut columns: Vec<&mut [E]> = data.chunks_mut(n1 + 1).collect();
            par_for_each_mut(props.threads, &mut columns, |j, col| {
                if j < n1 {
                    let sj = ws[s1[j]];
                    let yj = dataset.label(sj);
                    for (i, value) in col.iter_mut().enumerate().take(n1) {
                        let si = ws[s1[i]];
                        *value = kernel.k(si, sj) * dataset.label(si) * yj;
                        if i == j {
                            *value += 1.0 / a[s1[i]];
                        }
                    }
                    col[n1] = yj;
                } else {
                    for (i, value) in col.iter_mut().enumerate().take(n1) {
                        *value = dataset.label(ws[s1[i]]);
                    }
                    col[n1] = 0.0;
                }
            });
        }

        let mut rhs = vec![0.0; n1 + 1];
        for (i, value) in rhs.iter_mut().enumerate().take(n1) {
            *value = 1.0 - g13[i] - g_in[s1[i]];
        }
        rhs[n1] = -g13[n1] - g_in[n];

        let beta_aux = solve_kkt(ctx, &mut h, &rhs)?;

        max_beta = 0.0;
        min_beta = 0.0;
        beta_new.iter_mut().for_each(|v| *v = 0.0);
        for i in 0..n1 {
            max_beta = max_beta.max(beta_aux[i]);
            min_beta = min_beta.min(beta_aux[i]);
            beta_new[s1[i]] = beta_aux[i] * dataset.label(ws[s1[i]]);
        }
        for &i in &s3 {
            beta_new[i] = c * dataset.label(ws[i]);
        }
        beta_new[n] = beta_aux[n1];

        delta_w = 0.0;
        norm_w = 0.0;
        for i in 0..n + 1 {
            delta_w += (beta_new[i] - beta[i]) * (beta_new[i] - beta[i]);
            norm_w += beta[i] * beta[i];
        }

        // Rank-1 residual correction over the changed multipliers.
        {
            let beta_new = &beta_new;
            let beta = &beta;
            par_for_each_mut(props.threads, &mut e, |i, ei| {
                for j in 0..n {
                    if beta_new[j] != beta[j] {
                        *ei -= kernel.k(ws[i], ws[j]) * (beta_new[j] - beta[j]);
                    }
                }
                *ei -= beta_new[n] - beta[n];
            });
        }

        let ratio = delta_w / norm_w;
        if ratio < best_ratio {
            best_ratio = ratio;
            since_best = 0;
            beta_best.copy_from_slice(&beta_new);
        } else {
            since_best += 1;
        }

        // Re-partition the working subset.
        {
            let beta_new = &beta_new;
            let e = &e;
            let mut per_sample: Vec<(E, SampleGroup, E)> = (0..n)
                .map(|i| (a[i], group[i], beta[i]))
                .collect();
            par_for_each_mut(props.threads, &mut per_sample, |i, slot| {
                let y = dataset.label(ws[i]);
                let ey = e[i] * y;
                slot.0 = if ey < 0.0 {
                    0.0
                } else if ey < 1.0 / WEIGHT_CAP {
                    c * WEIGHT_CAP
                } else {
                    y * c / e[i]
                };

                if ey < 0.0 && slot.1 != SampleGroup::Inactive {
                    slot.1 = SampleGroup::Inactive;
                }
                if slot.1 == SampleGroup::Unbounded
                    && y * beta_new[i] >= 0.99 * c
                    && y * beta_new[i] <= 1.01 * c
                {
                    slot.1 = SampleGroup::Bounded;
                }
                if slot.0 == 0.0 && slot.1 == SampleGroup::Unbounded {
                    slot.1 = SampleGroup::Inactive;
                }
                if slot.1 == SampleGroup::Inactive && slot.0 != 0.0 {
                    slot.1 = SampleGroup::Unbounded;
                }
                slot.2 = beta_new[i];
            });
            for (i, (ai, gi, bi)) in per_sample.into_iter().enumerate() {
                a[i] = ai;
                group[i] = gi;
                beta[i] = bi;
            }
        }
        beta[n] = beta_new[n];

        s1.clear();
        s3.clear();
        for i in 0..n {
            match group[i] {
                SampleGroup::Unbounded => s1.push(i),
                SampleGroup::Bounded => s3.push(i),
                SampleGroup::Inactive => {}
            }
        }

        let n1 = s1.len();
        g13 = vec![0.0; n1 + 1];
        if !s3.is_empty() {
            let s1 = &s1;
            let s3 = &s3;
            par_for_each_mut(props.threads, &mut g13, |i, v| {
                if i < n1 {
                    let si = ws[s1[i]];
                    let yi = dataset.label(si);
                    *v = s3
                        .iter()
                        .map(|&o| {
                            let so = ws[o];
                            c * kernel.k(si, so) * yi * dataset.label(so)
                        })
                        .sum();
                } else {
                    *v = s3.iter().map(|&o| c * dataset.label(ws[o])).sum();
                }
            });
        }
    }

    Ok(beta_best)
}

/// Solves the bordered KKT system `[[Q, y], [yᵀ, 0]]·x = rhs`.
///
/// The leading block `Q` is factored by the parallel Cholesky; the bias
/// unknown is eliminated through the (negative) Schur complement of the
/// border, and the substitution passes run single-threaded.
fn solve_kkt(
    ctx: &mut LinalgContext,
    h: &mut DenseMatrix,
    rhs: &[E],
) -> Result<Vec<E>, NumericError> {
    let n1 = h.rows() - 1;
    if n1 == 0 {
        // Nothing but the bias row: the system is singular.
        return Err(NumericError::NotPositiveDefinite);
    }

    let y: Vec<E> = (0..n1).map(|i| h.get(i, n1)).collect();
    ctx.cholesky_capped(h.as_view_mut().submatrix(0, 0, n1, n1), n1)?;
    let l = h.as_view().submatrix(0, 0, n1, n1);

    let mut z = rhs[..n1].to_vec();
    forward_sub(l, &mut z);
    let mut u = y;
    forward_sub(l, &mut u);

    let schur: E = -u.iter().map(|v| v * v).sum::<E>();
    if schur == 0.0 {
        return Err(NumericError::NotPositiveDefinite);
    }
    let dot_uz: E = u.iter().zip(&z).map(|(a, b)| a * b).sum();
    let bias = (rhs[n1] - dot_uz) / schur;

    let mut x: Vec<E> = z.iter().zip(&u).map(|(zi, ui)| zi - ui * bias).collect();
    backward_sub(l, &mut x);
    x.push(bias);
    Ok(x)
}

fn forward_sub(l: MatView<'_>, b: &mut [E]) {
    for i in 0..b.len() {
        let mut acc = b[i];
        for k in 0..i {
            acc -= l.get(i, k) * b[k];
        }
        b[i] = acc / l.get(i, i);
    }
}

fn backward_sub(l: MatView<'_>, b: &mut [E]) {
    for i in (0..b.len()).rev() {
        let mut acc = b[i];
        for k in i + 1..b.len() {
            acc -= l.get(k, i) * b[k];
        }
        b[i] = acc / l.get(i, i);
    }
}
