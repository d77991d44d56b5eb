//! Centroid selection for the semiparametric model.
//!
//! Either a uniform random draw or the Sparse Greedy Matrix Approximation:
//! greedily pick the candidate whose inclusion best reduces the Nyström
//! approximation error, extending the Cholesky factor of `K_CC` and its
//! inverse by one row per step instead of refactorizing.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::dataset::Dataset;
use crate::kernels::Kernel;
use crate::linalg::blas::{Backend, SerialKernel};
use crate::linalg::dense::DenseMatrix;
use crate::linalg::parallel::par_for_each_mut;
use crate::{E, I, NumericError, TrainProperties};

/// Candidates drawn per greedy step, half from each class.
const CANDIDATES: I = 64;

/// Ridge added to `K(c, c)` for the first centroid.
const FIRST_RIDGE: E = 1e-6;
/// Ridge added to `K(c, c)` when growing the factor.
const GROWTH_RIDGE: E = 1e-5;

/// Uniform random selection: a permutation prefix of size `m`.
pub fn random_centroids(dataset: &Dataset, m: I, rng: &mut impl Rng) -> Vec<I> {
    let mut permutation: Vec<I> = (0..dataset.len()).collect();
    permutation.shuffle(rng);
    permutation.truncate(m);
    permutation
}

struct CandidateScratch {
    index: I,
    /// `K(·, candidate)` over all samples, then the residual column.
    ksm: Vec<E>,
    /// `K(C, candidate)`.
    knc: Vec<E>,
    /// `K_CC⁻¹·K(C, candidate)`.
    z: Vec<E>,
    score: E,
}

/// Greedy SGMA selection of `m` centroid indices.
///
/// The first two centroids are the synthetic class averages; the PRNG is
/// only touched in the serial prologue of each step, so a fixed seed
/// yields the same centroid list on every run.
pub fn select(
    dataset: &Dataset,
    props: &TrainProperties,
    backend: &Backend,
    rng: &mut impl Rng,
) -> Result<Vec<I>, NumericError> {
    let n = dataset.len();
    let m = props.model_size;
    let threads = props.threads.max(1);
    let kernel = Kernel::new(dataset, props.kernel, props.gamma);

    let mut centroids: Vec<I> = Vec::with_capacity(m);
    // Cholesky factor of K_CC and its inverse, grown one row per step.
    let mut factor = DenseMatrix::zeros(m, m);
    let mut inverse = DenseMatrix::zeros(m, m);
    let mut ksc = DenseMatrix::zeros(n, m);

    // Candidate buffers are reserved once and reused by every step.
    let mut scratch: Vec<CandidateScratch> = (0..CANDIDATES)
        .map(|_| CandidateScratch {
            index: 0,
            ksm: vec![0.0; n],
            knc: vec![0.0; m],
            z: vec![0.0; m],
            score: 0.0,
        })
        .collect();

    while centroids.len() < m {
        let size = centroids.len();

        let chosen = if size == 0 {
            // Class-average of the positive samples.
            n
        } else if size == 1 {
            // Class-average of the negative samples.
            n + 1
        } else {
            // Serial prologue: draw 64 candidates, alternating classes.
            for (i, slot) in scratch.iter_mut().enumerate() {
                let wanted = (i % 2) as E * 2.0 - 1.0;
                let mut index = rng.random_range(0..n);
                while dataset.label(index) != wanted {
                    index = rng.random_range(0..n);
                }
                slot.index = index;
            }

            // Parallel scoring of the error descent per candidate.
            let factor_view = factor.as_view().submatrix(0, 0, size, size);
            let ksc_ref = &ksc;
            par_for_each_mut(threads, &mut scratch, |_, slot| {
                let cand = slot.index;
                for (e, v) in slot.ksm.iter_mut().enumerate() {
                    *v = kernel.k(cand, e);
                }
                for e in 0..size {
                    let value = kernel.k(cand, centroids[e]);
                    slot.knc[e] = value;
                    slot.z[e] = value;
                }
                backend.potrs(factor_view, &mut slot.z[..size]);

                let mut eta = 1.0;
                for e in 0..size {
                    eta -= slot.knc[e] * slot.z[e];
                }

                // Residual of the Nyström reconstruction of K(·, cand).
                let mut value = 0.0;
                for e in 0..n {
                    let mut reconstructed = 0.0;
                    for s in 0..size {
                        reconstructed += ksc_ref.get(e, s) * slot.z[s];
                    }
                    let residual = reconstructed - slot.ksm[e];
                    value += residual * residual;
                }
                slot.score = if eta > 0.0 { value / eta } else { 0.0 };
            });

            let mut best = 0;
            for i in 1..CANDIDATES {
                if scratch[i].score > scratch[best].score {
                    best = i;
                }
            }
            scratch[best].index
        };

        centroids.push(chosen);

        // New kernel column against the whole training set.
        {
            let mut column = vec![0.0; n];
            par_for_each_mut(threads, &mut column, |i, v| *v = kernel.k(i, chosen));
            for (i, v) in column.into_iter().enumerate() {
                ksc.set(i, size, v);
            }
        }

        // Rank-1 growth of the factor and its inverse.
        if size == 0 {
            let pivot = (kernel.k(chosen, chosen) + FIRST_RIDGE).sqrt();
            factor.set(0, 0, pivot);
            inverse.set(0, 0, 1.0 / pivot);
        } else {
            let knc: Vec<E> = (0..size).map(|e| kernel.k(chosen, centroids[e])).collect();

            // l2 = L⁻¹·k_Cc
            let mut l2 = vec![0.0; size];
            par_for_each_mut(threads, &mut l2, |i, v| {
                *v = (0..=i).map(|e| inverse.get(i, e) * knc[e]).sum();
            });

            let mut pivot_sq = kernel.k(chosen, chosen) + GROWTH_RIDGE;
            for v in &l2 {
                pivot_sq -= v * v;
            }
            if pivot_sq <= 0.0 {
                return Err(NumericError::NotPositiveDefinite);
            }
            let pivot = pivot_sq.sqrt();
            let inv_pivot = 1.0 / pivot;

            // il2 = L₂ᵀ·L⁻¹
            let mut il2 = vec![0.0; size];
            {
                let l2 = &l2;
                par_for_each_mut(threads, &mut il2, |j, v| {
                    *v = (j..size).map(|i| l2[i] * inverse.get(i, j)).sum();
                });
            }

            for e in 0..size {
                factor.set(size, e, l2[e]);
                inverse.set(size, e, -inv_pivot * il2[e]);
            }
            factor.set(size, size, pivot);
            inverse.set(size, size, inv_pivot);
        }
    }

    Ok(centroids)
}
