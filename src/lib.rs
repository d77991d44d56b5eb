use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::kernels::KernelKind;
use crate::semiparametric::CentroidSelection;

/// Scalar element type used throughout the crate.
pub type E = f64;
/// Index type used throughout the crate.
pub type I = usize;

pub mod callback;
pub mod dataset;
pub mod full;
pub mod interface;
pub mod kernels;
pub mod linalg;
pub mod model;
pub mod semiparametric;

#[cfg(test)]
pub mod tests;

/// Status codes for the training loops.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver is still running.
    InProgress,
    /// The convergence criterion was met.
    Converged,
    /// The iteration limit was reached.
    IterationLimit,
    /// The weight change stopped improving for the configured number of
    /// iterations; the best-seen weights were returned.
    Stalled,
}

/// Numerical failures inside the solvers.
#[derive(Debug, Display, Error, PartialEq, Eq, Clone, Copy)]
pub enum NumericError {
    #[display("matrix is not positive definite")]
    NotPositiveDefinite,

    #[display("weight update ratio diverged")]
    Divergence,
}

/// Resource acquisition failures.
#[derive(Debug, Display, Error, PartialEq, Eq, Clone, Copy)]
pub enum ResourceError {
    #[display("failed to reserve the per-worker scratch arena")]
    ScratchArena,
}

/// Caller contract violations detected up front.
#[derive(Debug, Display, Error, PartialEq, Eq, Clone, Copy)]
pub enum ProgrammingError {
    #[display("training requires at least one sample of each class")]
    SingleClassDataset,

    #[display("the semiparametric model size must be positive")]
    EmptyModel,

    #[display("SGMA centroid selection requires the RBF kernel")]
    SgmaNeedsRbf,
}

/// Any error the training entry points can produce.
#[derive(Debug, Display, Error, From, PartialEq, Eq, Clone, Copy)]
pub enum TrainError {
    Numeric(NumericError),
    Resource(ResourceError),
    Programming(ProgrammingError),
}

/// Training parameters of the IRWLS procedures.
///
/// Defaults match the reference command line: `γ = 1`, `C = 1`, one
/// thread, working sets of 500, `η = 10⁻³`, semiparametric size 10 with
/// SGMA selection, RBF kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainProperties {
    /// Kernel function to use.
    pub kernel: KernelKind,
    /// Gamma parameter of the RBF kernel (ignored for the linear kernel).
    pub gamma: E,
    /// C parameter of the SVM cost function.
    pub c: E,
    /// Number of threads for the parallel operations.
    pub threads: I,
    /// Maximum size of the working set (full IRWLS).
    pub working_set_size: I,
    /// Convergence tolerance on the squared relative weight change.
    pub eta: E,
    /// Size of the semiparametric model.
    pub model_size: I,
    /// Centroid selection strategy (semiparametric only).
    pub selection: CentroidSelection,
}

impl Default for TrainProperties {
    fn default() -> Self {
        Self {
            kernel: KernelKind::Rbf,
            gamma: 1.0,
            c: 1.0,
            threads: 1,
            working_set_size: 500,
            eta: 1e-3,
            model_size: 10,
            selection: CentroidSelection::Sgma,
        }
    }
}

impl TrainProperties {
    pub fn with_kernel(mut self, kernel: KernelKind) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_gamma(mut self, gamma: E) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_c(mut self, c: E) -> Self {
        self.c = c;
        self
    }

    pub fn with_threads(mut self, threads: I) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_working_set_size(mut self, size: I) -> Self {
        self.working_set_size = size;
        self
    }

    pub fn with_eta(mut self, eta: E) -> Self {
        self.eta = eta;
        self
    }

    pub fn with_model_size(mut self, size: I) -> Self {
        self.model_size = size;
        self
    }

    pub fn with_selection(mut self, selection: CentroidSelection) -> Self {
        self.selection = selection;
        self
    }
}

/// Hooks threaded through the training loops.
pub struct TrainHooks {
    pub callback: Box<dyn crate::callback::Callback>,
}

impl TrainHooks {
    /// Hooks that emit nothing.
    pub fn silent() -> Self {
        Self {
            callback: Box::new(crate::callback::NoOpCallback {}),
        }
    }

    /// Hooks that print one convergence row per outer iteration.
    pub fn verbose() -> Self {
        Self {
            callback: Box::new(crate::callback::ConvergenceOutput {}),
        }
    }
}

impl Default for TrainHooks {
    fn default() -> Self {
        Self::silent()
    }
}
