use std::error::Error;
use std::fmt::{Display, Formatter};
use nalgebra::DVector;

type DenseVector = DVector<f64>;

///
/// Variational parameters and objective trace recovered from a run
/// that aborted mid-optimization
///
#[derive(Debug, Clone)]
pub struct PartialFit {
    /// Last valid parameter vector for each factor, keyed by latent name
    pub parameters: Vec<(String, DenseVector)>,
    /// ELBO estimates recorded before the failure
    pub trace: Vec<f64>
}

#[derive(Debug)]
pub enum InferenceError {
    /// Invalid iteration count, sample size, or step-size schedule
    InvalidConfiguration(String),
    /// Observed data shape disagrees with the model's declaration
    DimensionMismatch { expected: usize, actual: usize },
    /// A non-finite density, gradient, or parameter update was detected
    NumericalInstability { iteration: usize, detail: String, last_valid: PartialFit },
    /// The variational family lacks an operation required by the fitter
    UnsupportedFamily(String)
}

impl Display for InferenceError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            InferenceError::InvalidConfiguration(msg) => {
                write!(f, "invalid configuration: {}", msg)
            },
            InferenceError::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {} observations but received {}", expected, actual)
            },
            InferenceError::NumericalInstability { iteration, detail, .. } => {
                write!(f, "numerical instability at iteration {}: {}", iteration + 1, detail)
            },
            InferenceError::UnsupportedFamily(msg) => {
                write!(f, "unsupported variational family: {}", msg)
            }
        }
    }
}

impl Error for InferenceError {}
