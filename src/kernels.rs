//! Kernel functions over sparse samples.

use serde::{Deserialize, Serialize};

use crate::E;
use crate::dataset::{Dataset, Feature};

/// The kernel function family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    /// `K(x, y) = <x, y>`
    Linear,
    /// `K(x, y) = exp(-γ‖x - y‖²)`
    Rbf,
}

impl KernelKind {
    /// Integer code used in the model file (`0 = linear`, `1 = rbf`).
    pub fn code(self) -> i32 {
        match self {
            KernelKind::Linear => 0,
            KernelKind::Rbf => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(KernelKind::Linear),
            1 => Some(KernelKind::Rbf),
            _ => None,
        }
    }
}

/// Inner product of two sparse samples by a two-pointer merge over the
/// sorted index sequences.
pub fn sparse_dot(a: &[Feature], b: &[Feature]) -> E {
    let mut sum = 0.0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].index == b[j].index {
            sum += a[i].value * b[j].value;
            i += 1;
            j += 1;
        } else if a[i].index < b[j].index {
            i += 1;
        } else {
            j += 1;
        }
    }
    sum
}

/// Kernel value between two feature rows with cached squared norms.
///
/// `dense` enables the direct index walk (both rows carry every index).
pub fn eval(
    kind: KernelKind,
    gamma: E,
    a: &[Feature],
    qa: E,
    b: &[Feature],
    qb: E,
    dense: bool,
) -> E {
    match kind {
        KernelKind::Linear => sparse_dot(a, b),
        KernelKind::Rbf => {
            let dist_sq = if dense && a.len() == b.len() {
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x.value - y.value) * (x.value - y.value))
                    .sum()
            } else {
                qa + qb - 2.0 * sparse_dot(a, b)
            };
            (-gamma * dist_sq).exp()
        }
    }
}

/// Kernel evaluations bound to one dataset.
#[derive(Clone, Copy)]
pub struct Kernel<'a> {
    dataset: &'a Dataset,
    kind: KernelKind,
    gamma: E,
}

impl<'a> Kernel<'a> {
    pub fn new(dataset: &'a Dataset, kind: KernelKind, gamma: E) -> Self {
        Self {
            dataset,
            kind,
            gamma,
        }
    }

    /// `K(x_i, x_j)`.
    pub fn k(&self, i: usize, j: usize) -> E {
        eval(
            self.kind,
            self.gamma,
            self.dataset.sample(i),
            self.dataset.quadratic_value(i),
            self.dataset.sample(j),
            self.dataset.quadratic_value(j),
            !self.dataset.sparse(),
        )
    }

    /// `K(x_i, x_i)` without touching the features: exactly `1` for the
    /// RBF kernel and the cached squared norm for the linear one.
    pub fn self_value(&self, i: usize) -> E {
        match self.kind {
            KernelKind::Linear => self.dataset.quadratic_value(i),
            KernelKind::Rbf => 1.0,
        }
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn gamma(&self) -> E {
        self.gamma
    }
}
