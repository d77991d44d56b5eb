//! Semiparametric IRWLS training.
//!
//! A fixed budget of centroids is selected first (uniformly at random or
//! by SGMA), then the reduced model is fitted by iteratively re-weighted
//! least squares on the normal equations
//! `(K_CC + K_ACᵀ·D_A·K_AC)·β = K_ACᵀ·D_A·y_A` over the currently active
//! samples `A`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::callback::IterationRecord;
use crate::dataset::Dataset;
use crate::full::TrainOutcome;
use crate::kernels::{Kernel, KernelKind};
use crate::linalg::blas::{Backend, Trans};
use crate::linalg::dense::{DenseMatrix, MatView, MatViewMut};
use crate::linalg::parallel::{LinalgContext, par_for_each_mut, pow2_at_most};
use crate::{E, I, NumericError, ProgrammingError, Status, TrainError, TrainHooks, TrainProperties};

pub mod sgma;

/// Centroid selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentroidSelection {
    /// Uniform draw without replacement.
    Random,
    /// Sparse Greedy Matrix Approximation.
    Sgma,
}

const MAX_ITER: I = 500;
const TOLERANCE: E = 1e-6;
const STALL_LIMIT: I = 5;
/// Initial weight cap; halved by the divergence safeguard.
const WEIGHT_CAP: E = 1e4;

/// The reduced-model IRWLS solver.
pub struct SemiparametricIrwls<'a> {
    dataset: &'a Dataset,
    props: &'a TrainProperties,
    backend: Backend,
}

impl<'a> SemiparametricIrwls<'a> {
    pub fn new(dataset: &'a Dataset, props: &'a TrainProperties) -> Result<Self, ProgrammingError> {
        if props.model_size == 0 {
            return Err(ProgrammingError::EmptyModel);
        }
        if !dataset.has_both_classes() {
            return Err(ProgrammingError::SingleClassDataset);
        }
        if props.selection == CentroidSelection::Sgma && props.kernel == KernelKind::Linear {
            // SGMA scores candidates through the Schur complement of a
            // gram matrix with unit diagonal, which only the RBF kernel
            // provides.
            return Err(ProgrammingError::SgmaNeedsRbf);
        }
        Ok(Self {
            dataset,
            props,
            backend: Backend::default(),
        })
    }

    /// Replaces the serial linear-algebra backend (native by default).
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Selects the centroids and fits the reduced model. Returns the
    /// weights (one per centroid, no bias) and the centroid indices.
    pub fn solve(
        &self,
        hooks: &mut TrainHooks,
        rng: &mut impl Rng,
    ) -> Result<(TrainOutcome, Vec<I>), TrainError> {
        let dataset = self.dataset;
        let props = self.props;
        let n = dataset.len();

        let centroids = match props.selection {
            CentroidSelection::Random => {
                sgma::random_centroids(dataset, props.model_size.min(n), rng)
            }
            CentroidSelection::Sgma => {
                let clamped;
                let props = if props.model_size > n + 2 {
                    clamped = props.clone().with_model_size(n + 2);
                    &clamped
                } else {
                    props
                };
                sgma::select(dataset, props, &self.backend, rng)
                    .map_err(TrainError::Numeric)?
            }
        };
        let outcome = self.fit(&centroids, hooks)?;
        Ok((outcome, centroids))
    }

    /// Weighted least-squares fit for fixed centroids.
    pub fn fit(&self, centroids: &[I], hooks: &mut TrainHooks) -> Result<TrainOutcome, TrainError> {
        let dataset = self.dataset;
        let props = self.props;
        let n = dataset.len();
        let m = centroids.len();
        let threads = props.threads.max(1);
        let kernel = Kernel::new(dataset, props.kernel, props.gamma);
        let mut ctx = LinalgContext::new(threads, m, self.backend)?;
        let solve_cap = pow2_at_most(threads.min(m.max(1)));

        // K_CC with a small diagonal ridge.
        let mut kc = DenseMatrix::zeros(m, m);
        {
            let mut columns: Vec<&mut [E]> = kc.as_mut_slice().chunks_mut(m).collect();
            par_for_each_mut(threads, &mut columns, |j, col| {
                for (i, v) in col.iter_mut().enumerate() {
                    *v = kernel.k(centroids[i], centroids[j]);
                    if i == j {
                        *v += 1e-5;
                    }
                }
            });
        }

        // K_SC, one column per sample.
        let mut ksc = DenseMatrix::zeros(m, n);
        {
            let mut columns: Vec<&mut [E]> = ksc.as_mut_slice().chunks_mut(m).collect();
            par_for_each_mut(threads, &mut columns, |i, col| {
                for (j, v) in col.iter_mut().enumerate() {
                    *v = kernel.k(i, centroids[j]);
                }
            });
        }

        let mut cap = WEIGHT_CAP;
        // Warm start: every sample active with the capped weight; the
        // weighted columns start unscaled.
        let mut da = vec![cap; n];
        let mut day: Vec<E> = (0..n).map(|i| dataset.label(i) * cap).collect();
        let mut ksca = ksc.clone();
        let mut active: Vec<I> = (0..n).collect();

        let mut beta = vec![0.0; m];
        let mut beta_new = vec![0.0; m];
        let mut beta_best = vec![0.0; m];
        let mut e = vec![0.0; n];

        let (mut delta_w, mut norm_w) = (1e9_f64, 1.0_f64);
        let mut best_ratio = 1e9;
        let mut last_ratio = E::INFINITY;
        let mut old_ratio = 0.0;
        let mut since_best = 0;
        let mut growth_streak = 0;
        let mut halvings = 0;
        let mut iter = 0;
        let mut status = Status::InProgress;

        while iter < MAX_ITER && delta_w / norm_w > TOLERANCE && since_best < STALL_LIMIT {
            let n_active = active.len();

            // Reduced normal equations.
            let mut k1 = kc.clone();
            let mut k2 = vec![0.0; m];
            if n_active > 0 {
                let weighted = ksca.as_view().submatrix(0, 0, m, n_active);
                ctx.syrk(1.0, weighted, 1.0, k1.as_view_mut());
                let day_view = MatView::from_slice(&day[..n_active], n_active, 1);
                let k2_view = MatViewMut::from_slice(&mut k2, m, 1);
                ctx.gemm(1.0, weighted, Trans::No, day_view, Trans::No, 0.0, k2_view);
            }

            if ctx.spd_solve(&mut k1, &k2, &mut beta_new, solve_cap).is_err() {
                // Recover with the best weights seen so far.
                status = Status::Stalled;
                break;
            }

            delta_w = 0.0;
            norm_w = 0.0;
            for i in 0..m {
                delta_w += (beta_new[i] - beta[i]) * (beta_new[i] - beta[i]);
                norm_w += beta_new[i] * beta_new[i];
            }
            beta.copy_from_slice(&beta_new);

            // Residual over the whole training set.
            {
                let (ksc_ref, beta_ref) = (&ksc, &beta);
                par_for_each_mut(threads, &mut e, |i, ei| {
                    let mut f = 0.0;
                    for j in 0..m {
                        f += ksc_ref.get(j, i) * beta_ref[j];
                    }
                    *ei = dataset.label(i) - f;
                });
            }

            // Refresh the IRWLS weights, capped.
            {
                let e_ref = &e;
                par_for_each_mut(threads, &mut da, |i, v| {
                    let y = dataset.label(i);
                    *v = if e_ref[i] * y < 0.0 {
                        0.0
                    } else {
                        props.c / (y * e_ref[i])
                    };
                    if *v > cap {
                        *v = cap;
                    }
                });
            }

            active.clear();
            for (i, v) in da.iter().enumerate() {
                if *v != 0.0 {
                    active.push(i);
                }
            }
            let n_active = active.len();

            {
                let (active_ref, da_ref, ksc_ref) = (&active, &da, &ksc);
                let mut columns: Vec<&mut [E]> = ksca
                    .as_mut_slice()
                    .chunks_mut(m)
                    .take(n_active)
                    .collect();
                par_for_each_mut(threads, &mut columns, |k, col| {
                    let idx = active_ref[k];
                    let scale = da_ref[idx].sqrt();
                    for (j, v) in col.iter_mut().enumerate() {
                        *v = scale * ksc_ref.get(j, idx);
                    }
                });
            }
            for (k, &idx) in active.iter().enumerate() {
                day[k] = da[idx].sqrt() * dataset.label(idx);
            }

            iter += 1;
            let ratio = delta_w / norm_w;
            last_ratio = ratio;
            hooks.callback.call(&IterationRecord {
                iteration: iter,
                unbounded: n_active,
                bounded: 0,
                ratio,
            });

            // Divergence safeguard: loosen the weight cap when the ratio
            // jumps, give up when it keeps growing regardless.
            if iter > 10 && ratio > 100.0 * old_ratio {
                cap /= 2.0;
                halvings += 1;
            }
            if iter > 10 && ratio > old_ratio {
                growth_streak += 1;
            } else {
                growth_streak = 0;
            }
            if halvings > 0 && growth_streak >= STALL_LIMIT {
                return Err(TrainError::Numeric(NumericError::Divergence));
            }
            old_ratio = ratio;

            if ratio < best_ratio {
                best_ratio = ratio;
                since_best = 0;
                beta_best.copy_from_slice(&beta_new);
            } else {
                since_best += 1;
            }
        }

        if status == Status::InProgress {
            status = if delta_w / norm_w <= TOLERANCE {
                Status::Converged
            } else if since_best >= STALL_LIMIT {
                Status::Stalled
            } else {
                Status::IterationLimit
            };
        }

        Ok(TrainOutcome {
            beta: beta_best,
            status,
            iterations: iter,
            best_ratio,
            last_ratio,
        })
    }
}

/// Trains the semiparametric SVM: centroid selection followed by the
/// reduced weighted least-squares fit.
pub fn train_semiparametric(
    dataset: &Dataset,
    props: &TrainProperties,
    hooks: &mut TrainHooks,
    rng: &mut impl Rng,
) -> Result<(TrainOutcome, Vec<I>), TrainError> {
    Ok(SemiparametricIrwls::new(dataset, props)?.solve(hooks, rng)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn toy() -> Dataset {
        Dataset::labeled(&[
            (1.0, vec![(1, 1.0)]),
            (1.0, vec![(1, 2.0)]),
            (-1.0, vec![(1, -1.0)]),
            (-1.0, vec![(1, -2.0)]),
        ])
    }

    #[test]
    fn empty_model_is_rejected() {
        let d = toy();
        let props = TrainProperties::default().with_model_size(0);
        assert!(matches!(
            SemiparametricIrwls::new(&d, &props),
            Err(ProgrammingError::EmptyModel)
        ));
    }

    #[test]
    fn sgma_with_linear_kernel_is_rejected() {
        let d = toy();
        let props = TrainProperties::default()
            .with_kernel(KernelKind::Linear)
            .with_selection(CentroidSelection::Sgma);
        assert!(matches!(
            SemiparametricIrwls::new(&d, &props),
            Err(ProgrammingError::SgmaNeedsRbf)
        ));
    }

    #[test]
    fn random_selection_with_linear_kernel_is_allowed() {
        let d = toy();
        let props = TrainProperties::default()
            .with_kernel(KernelKind::Linear)
            .with_selection(CentroidSelection::Random)
            .with_model_size(2);
        let (outcome, centroids) = train_semiparametric(
            &d,
            &props,
            &mut TrainHooks::silent(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        assert_eq!(centroids.len(), 2);
        assert_eq!(outcome.beta.len(), 2);
    }

    #[test]
    fn reduced_model_separates_the_toy_problem() {
        let d = toy();
        let props = TrainProperties::default().with_model_size(4);
        let (outcome, centroids) = train_semiparametric(
            &d,
            &props,
            &mut TrainHooks::silent(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();

        let kernel = Kernel::new(&d, props.kernel, props.gamma);
        for i in 0..d.len() {
            let f: E = centroids
                .iter()
                .zip(&outcome.beta)
                .map(|(&c, &w)| w * kernel.k(i, c))
                .sum();
            assert!(f * d.label(i) > 0.0, "sample {i} misclassified ({f})");
        }
    }
}
