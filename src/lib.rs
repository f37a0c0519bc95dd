//!
//! This crate provides mean-field variational inference for probability
//! models that expose only a log-density evaluation (black-box variational
//! inference with score-function gradients)
//!

pub mod config;
pub mod distribution;
pub mod error;
pub mod mean_field;
pub mod model;
mod math;

pub use config::{FitConfig, StepSchedule};
pub use distribution::{VariationalFamily, Support, BetaDistribution, GammaDistribution};
pub use error::{InferenceError, PartialFit};
pub use mean_field::{MeanFieldInference, MeanField, FitOutput, FitTrace, StopReason, CancelToken};
pub use model::{DensityModel, LatentSpec, BetaBernoulliModel};

use nalgebra::DVector;
type DenseVector = DVector<f64>;

///
/// Conversion of caller-supplied observations into the dense vector
/// consumed by the fitting loop
///
pub trait Observations {
    fn into_vector(self) -> DenseVector;
}

impl Observations for Vec<f64> {
    fn into_vector(self) -> DenseVector {
        DenseVector::from_vec(self)
    }
}

impl Observations for &Vec<f64> {
    fn into_vector(self) -> DenseVector {
        self.as_slice().into_vector()
    }
}

impl Observations for &[f64] {
    fn into_vector(self) -> DenseVector {
        DenseVector::from_column_slice(self)
    }
}

impl Observations for Vec<bool> {
    fn into_vector(self) -> DenseVector {
        self.as_slice().into_vector()
    }
}

impl Observations for &Vec<bool> {
    fn into_vector(self) -> DenseVector {
        self.as_slice().into_vector()
    }
}

impl Observations for &[bool] {
    fn into_vector(self) -> DenseVector {
        let iter = self.iter().map(|&outcome| if outcome { 1.0 } else { 0.0 });
        DenseVector::from_iterator(self.len(), iter)
    }
}

impl Observations for Vec<u8> {
    fn into_vector(self) -> DenseVector {
        self.as_slice().into_vector()
    }
}

impl Observations for &[u8] {
    fn into_vector(self) -> DenseVector {
        let iter = self.iter().map(|&outcome| f64::from(outcome));
        DenseVector::from_iterator(self.len(), iter)
    }
}
