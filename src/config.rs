use serde::{Serialize, Deserialize};
use crate::error::InferenceError;

///
/// Step-size schedule for the stochastic gradient updates
///
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum StepSchedule {
    /// Fixed step size
    Constant(f64),
    /// Robbins-Monro style decay: eta_t = eta0 / (1 + t)^power
    Decay { eta0: f64, power: f64 }
}

impl StepSchedule {

    ///
    /// Provides the step size for the given iteration
    ///
    /// # Arguments
    ///
    /// `iter` - the (zero-based) iteration index
    ///
    pub fn step_size(&self, iter: usize) -> f64 {
        match *self {
            StepSchedule::Constant(eta) => eta,
            StepSchedule::Decay { eta0, power } => eta0 / (1.0 + iter as f64).powf(power)
        }
    }

    fn validate(&self) -> Result<(), InferenceError> {
        match *self {
            StepSchedule::Constant(eta) if eta <= 0.0 => {
                Err(InferenceError::InvalidConfiguration(String::from("Step size must be positive")))
            },
            StepSchedule::Decay { eta0, .. } if eta0 <= 0.0 => {
                Err(InferenceError::InvalidConfiguration(String::from("Initial step size must be positive")))
            },
            StepSchedule::Decay { power, .. } if power <= 0.0 => {
                Err(InferenceError::InvalidConfiguration(String::from("Decay power must be positive")))
            },
            _ => Ok(())
        }
    }
}

///
/// Specifies configurable hyperparameters for a variational fit
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Maximum number of optimization iterations
    pub max_iter: usize,
    /// Monte Carlo sample count per gradient estimate
    pub sample_size: usize,
    /// Step-size schedule
    pub schedule: StepSchedule,
    /// Optional early-stopping tolerance on the trailing ELBO average
    pub tolerance: Option<f64>,
    /// Width of the trailing average window used for early stopping
    pub window: usize,
    /// Maximum gradient norm; larger estimates are rescaled
    pub grad_clip: Option<f64>,
    /// Seed for the sampling random source
    pub seed: u64,
    /// Indicates whether or not to print fitting info
    pub verbose: bool,
    /// Print the objective every this many iterations when verbose
    pub report_every: usize
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            max_iter: 10000,
            sample_size: 32,
            schedule: StepSchedule::Decay { eta0: 0.1, power: 0.6 },
            tolerance: None,
            window: 100,
            grad_clip: Some(10.0),
            seed: 0,
            verbose: false,
            report_every: 100
        }
    }
}

impl FitConfig {

    ///
    /// Checks the configuration for invalid values
    ///
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.max_iter == 0 {
            return Err(InferenceError::InvalidConfiguration(String::from("Iteration count must be positive")));
        }
        if self.sample_size == 0 {
            return Err(InferenceError::InvalidConfiguration(String::from("Sample size must be positive")));
        }
        self.schedule.validate()?;
        if let Some(tolerance) = self.tolerance {
            if tolerance <= 0.0 {
                return Err(InferenceError::InvalidConfiguration(String::from("Tolerance must be positive")));
            }
            if self.window == 0 {
                return Err(InferenceError::InvalidConfiguration(String::from("Window must be positive when a tolerance is set")));
            }
        }
        if let Some(limit) = self.grad_clip {
            if limit <= 0.0 {
                return Err(InferenceError::InvalidConfiguration(String::from("Gradient clip must be positive")));
            }
        }
        if self.verbose && self.report_every == 0 {
            return Err(InferenceError::InvalidConfiguration(String::from("Report interval must be positive")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_default_is_valid() {
        assert!(FitConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = FitConfig { max_iter: 0, ..FitConfig::default() };
        assert!(matches!(config.validate(), Err(InferenceError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_sample_size_rejected() {
        let config = FitConfig { sample_size: 0, ..FitConfig::default() };
        assert!(matches!(config.validate(), Err(InferenceError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let config = FitConfig { schedule: StepSchedule::Constant(0.0), ..FitConfig::default() };
        assert!(matches!(config.validate(), Err(InferenceError::InvalidConfiguration(_))));
        let config = FitConfig { schedule: StepSchedule::Decay { eta0: 0.1, power: -1.0 }, ..FitConfig::default() };
        assert!(matches!(config.validate(), Err(InferenceError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_zero_window_rejected_with_tolerance() {
        let config = FitConfig { tolerance: Some(1e-4), window: 0, ..FitConfig::default() };
        assert!(matches!(config.validate(), Err(InferenceError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_decay_schedule_step_sizes() {
        let schedule = StepSchedule::Decay { eta0: 0.5, power: 1.0 };
        assert_approx_eq!(schedule.step_size(0), 0.5);
        assert_approx_eq!(schedule.step_size(1), 0.25);
        assert_approx_eq!(schedule.step_size(4), 0.1);
    }
}
