use nalgebra::DVector;
use serde::{Serialize, Deserialize};

use crate::distribution::Support;
use crate::error::InferenceError;
use crate::math::ln_beta_fn;

type DenseVector = DVector<f64>;

///
/// Declares a latent variable by name and support
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentSpec {
    /// Name of the latent variable
    pub name: String,
    /// Support constraint on its values
    pub support: Support
}

impl LatentSpec {
    pub fn new(name: &str, support: Support) -> LatentSpec {
        LatentSpec { name: String::from(name), support }
    }
}

///
/// A joint density over observed data and latent variables
///
/// The fitting loop treats the model as a black box: it only ever asks for
/// log-density evaluations, never for gradients, so an implementation may be
/// hand-coded or produced by a model compiler.
///
pub trait DensityModel {

    /// Latent variables of the model, in evaluation order
    fn latents(&self) -> Vec<LatentSpec>;

    /// Number of observations the model expects
    fn observation_count(&self) -> usize;

    ///
    /// Evaluates log p(data, latents)
    ///
    /// # Arguments
    ///
    /// `data` - the observed data vector
    /// `latents` - latent values, ordered as declared by `latents()`
    ///
    fn log_density(&self, data: &DenseVector, latents: &[f64]) -> f64;
}

///
/// Coin-flip model: Beta prior over the success probability,
/// Bernoulli likelihood over a fixed number of binary outcomes
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetaBernoulliModel {
    prior_alpha: f64,
    prior_beta: f64,
    trials: usize
}

impl BetaBernoulliModel {

    ///
    /// Constructs a new model
    ///
    /// # Arguments
    ///
    /// `prior_alpha` - first shape parameter of the Beta prior
    /// `prior_beta` - second shape parameter of the Beta prior
    /// `trials` - number of observed coin flips
    ///
    pub fn new(prior_alpha: f64, prior_beta: f64, trials: usize) -> Result<BetaBernoulliModel, InferenceError> {
        if prior_alpha <= 0.0 || prior_beta <= 0.0 {
            Err(InferenceError::InvalidConfiguration(String::from("Prior shape parameters must be positive")))
        } else if trials == 0 {
            Err(InferenceError::InvalidConfiguration(String::from("Trial count must be positive")))
        } else {
            Ok(BetaBernoulliModel { prior_alpha, prior_beta, trials })
        }
    }

    /// Convenience constructor with a flat Beta(1, 1) prior
    pub fn uniform_prior(trials: usize) -> Result<BetaBernoulliModel, InferenceError> {
        BetaBernoulliModel::new(1.0, 1.0, trials)
    }
}

impl DensityModel for BetaBernoulliModel {

    fn latents(&self) -> Vec<LatentSpec> {
        vec![LatentSpec::new("p", Support::UnitInterval)]
    }

    fn observation_count(&self) -> usize {
        self.trials
    }

    fn log_density(&self, data: &DenseVector, latents: &[f64]) -> f64 {
        let p = latents[0];
        if p <= 0.0 || p >= 1.0 {
            return f64::NEG_INFINITY;
        }
        let successes = data.sum();
        let failures = self.trials as f64 - successes;
        let prior = (self.prior_alpha - 1.0) * p.ln()
            + (self.prior_beta - 1.0) * (1.0 - p).ln()
            - ln_beta_fn(self.prior_alpha, self.prior_beta);
        prior + successes * p.ln() + failures * (1.0 - p).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observations;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_log_density_with_flat_prior() {
        let model = BetaBernoulliModel::uniform_prior(10).unwrap();
        let data = vec![0u8, 1, 0, 0, 0, 0, 0, 0, 0, 1].into_vector();
        // flat prior contributes zero; 2 successes, 8 failures
        let expected = 2.0 * 0.25f64.ln() + 8.0 * 0.75f64.ln();
        assert_approx_eq!(model.log_density(&data, &[0.25]), expected);
    }

    #[test]
    fn test_log_density_with_informative_prior() {
        let model = BetaBernoulliModel::new(2.0, 3.0, 2).unwrap();
        let data = vec![1.0, 0.0].into_vector();
        let p: f64 = 0.5;
        let prior = p.ln() + 2.0 * (1.0 - p).ln() + 12f64.ln();
        let likelihood = p.ln() + (1.0 - p).ln();
        assert_approx_eq!(model.log_density(&data, &[p]), prior + likelihood);
    }

    #[test]
    fn test_out_of_support_density_is_log_zero() {
        let model = BetaBernoulliModel::uniform_prior(3).unwrap();
        let data = vec![1.0, 0.0, 1.0].into_vector();
        assert_eq!(model.log_density(&data, &[0.0]), f64::NEG_INFINITY);
        assert_eq!(model.log_density(&data, &[1.2]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_declared_latents() {
        let model = BetaBernoulliModel::uniform_prior(5).unwrap();
        let latents = model.latents();
        assert_eq!(latents.len(), 1);
        assert_eq!(latents[0], LatentSpec::new("p", Support::UnitInterval));
        assert_eq!(model.observation_count(), 5);
    }

    #[test]
    fn test_invalid_construction_rejected() {
        assert!(BetaBernoulliModel::new(0.0, 1.0, 10).is_err());
        assert!(BetaBernoulliModel::new(1.0, 1.0, 0).is_err());
    }
}
