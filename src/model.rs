//! The trained classifier: weighted support vectors (or centroids) with
//! an owned feature arena, ready for prediction.

use crate::dataset::{Dataset, Feature, TERMINATOR};
use crate::kernels::{self, KernelKind};
use crate::linalg::parallel::par_for_each_mut;
use crate::{E, I, TrainProperties};

/// An inference-ready model.
///
/// The decision function is `f(x) = bias + Σ_s w_s·K(v_s, x)`.
pub struct Model {
    kernel: KernelKind,
    gamma: E,
    sparse: bool,
    maxdim: i32,
    bias: E,
    weights: Vec<E>,
    quadratic_value: Vec<E>,
    /// Arena offsets; vector `s` spans `offsets[s]..offsets[s + 1] - 1`.
    offsets: Vec<I>,
    features: Vec<Feature>,
}

impl Model {
    /// Assembles the model of a full training run: every sample with a
    /// non-zero multiplier becomes a support vector, `β[N]` is the bias.
    pub fn from_full(dataset: &Dataset, props: &TrainProperties, beta: &[E]) -> Self {
        let n = dataset.len();
        let supports = (0..n).filter(|&i| beta[i] != 0.0).map(|i| (i, beta[i]));
        Self::assemble(dataset, props, supports, beta[n])
    }

    /// Assembles the model of a semiparametric run: one weight per
    /// centroid, zero bias.
    pub fn from_semiparametric(
        dataset: &Dataset,
        props: &TrainProperties,
        beta: &[E],
        centroids: &[I],
    ) -> Self {
        let pairs = centroids.iter().zip(beta).map(|(&c, &w)| (c, w));
        Self::assemble(dataset, props, pairs, 0.0)
    }

    fn assemble(
        dataset: &Dataset,
        props: &TrainProperties,
        pairs: impl Iterator<Item = (I, E)>,
        bias: E,
    ) -> Self {
        let mut weights = Vec::new();
        let mut quadratic_value = Vec::new();
        let mut offsets = vec![0];
        let mut features = Vec::new();

        for (index, weight) in pairs {
            weights.push(weight);
            quadratic_value.push(dataset.quadratic_value(index));
            features.extend_from_slice(dataset.sample(index));
            features.push(Feature {
                index: TERMINATOR,
                value: 0.0,
            });
            offsets.push(features.len());
        }

        Self {
            kernel: props.kernel,
            gamma: props.gamma,
            sparse: dataset.sparse(),
            maxdim: dataset.maxdim(),
            bias,
            weights,
            quadratic_value,
            offsets,
            features,
        }
    }

    /// Rebuilds a model from its serialized parts; per-vector offsets are
    /// recovered by scanning the arena for sentinel entries.
    pub fn from_parts(
        kernel: KernelKind,
        gamma: E,
        sparse: bool,
        maxdim: i32,
        bias: E,
        weights: Vec<E>,
        quadratic_value: Vec<E>,
        features: Vec<Feature>,
    ) -> Self {
        let mut offsets = vec![0];
        for (k, f) in features.iter().enumerate() {
            if f.index == TERMINATOR {
                offsets.push(k + 1);
            }
        }
        Self {
            kernel,
            gamma,
            sparse,
            maxdim,
            bias,
            weights,
            quadratic_value,
            offsets,
            features,
        }
    }

    /// Number of support vectors (or centroids).
    pub fn len(&self) -> I {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Features of support vector `s`, without the sentinel.
    pub fn support_vector(&self, s: I) -> &[Feature] {
        &self.features[self.offsets[s]..self.offsets[s + 1] - 1]
    }

    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    pub fn gamma(&self) -> E {
        self.gamma
    }

    pub fn sparse(&self) -> bool {
        self.sparse
    }

    pub fn maxdim(&self) -> i32 {
        self.maxdim
    }

    pub fn bias(&self) -> E {
        self.bias
    }

    pub fn weights(&self) -> &[E] {
        &self.weights
    }

    pub fn quadratic_values(&self) -> &[E] {
        &self.quadratic_value
    }

    /// The feature arena, sentinel entries included.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Decision value for one feature row with its cached squared norm.
    pub fn decision_value(&self, x: &[Feature], qx: E) -> E {
        let mut f = self.bias;
        for s in 0..self.len() {
            f += self.weights[s]
                * kernels::eval(
                    self.kernel,
                    self.gamma,
                    self.support_vector(s),
                    self.quadratic_value[s],
                    x,
                    qx,
                    false,
                );
        }
        f
    }

    /// Decision values over a whole dataset, in sample order.
    pub fn predict(&self, dataset: &Dataset, threads: I) -> Vec<E> {
        let mut predictions = vec![0.0; dataset.len()];
        par_for_each_mut(threads.max(1), &mut predictions, |i, v| {
            *v = self.decision_value(dataset.sample(i), dataset.quadratic_value(i));
        });
        predictions
    }

    /// Fraction of samples whose predicted sign matches the label.
    pub fn accuracy(predictions: &[E], labels: &[E]) -> E {
        if predictions.is_empty() {
            return 0.0;
        }
        let correct = predictions
            .iter()
            .zip(labels)
            .filter(|(p, y)| (**p > 0.0) == (**y > 0.0))
            .count();
        correct as E / predictions.len() as E
    }
}
