use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};

use crate::Observations;
use crate::config::FitConfig;
use crate::distribution::VariationalFamily;
use crate::error::{InferenceError, PartialFit};
use crate::math::mean;
use crate::model::DensityModel;

type DenseVector = DVector<f64>;

///
/// Append-only sequence of per-iteration ELBO estimates
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitTrace {
    values: Vec<f64>
}

impl FitTrace {

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recent ELBO estimate
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// All recorded estimates, in iteration order
    pub fn values(&self) -> &[f64] {
        self.values.as_slice()
    }

    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    // absolute change between the trailing window average and the
    // window average preceding it, once enough history exists
    fn trailing_delta(&self, window: usize) -> Option<f64> {
        let n = self.values.len();
        if n < 2 * window {
            return None;
        }
        let recent = mean(&self.values[n - window..]);
        let previous = mean(&self.values[n - 2 * window..n - window]);
        Some((recent - previous).abs())
    }
}

///
/// Cooperative cancellation flag, checked between iterations
///
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>
}

impl CancelToken {

    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Requests cancellation of the associated run
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

///
/// Indicates why a fitting run stopped
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The configured iteration budget was exhausted
    MaxIter,
    /// The trailing ELBO average moved less than the tolerance
    Converged,
    /// The cancel token was triggered
    Cancelled
}

///
/// Factorized variational distribution over named latent variables
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanField<F> {
    factors: Vec<(String, F)>
}

impl<F: VariationalFamily> MeanField<F> {

    pub fn new() -> MeanField<F> {
        MeanField { factors: Vec::new() }
    }

    ///
    /// Adds a factor for the named latent variable
    ///
    /// # Arguments
    ///
    /// `name` - the latent variable name
    /// `factor` - the variational factor approximating its posterior
    ///
    pub fn with_factor(mut self, name: &str, factor: F) -> MeanField<F> {
        self.factors.push((String::from(name), factor));
        self
    }

    /// Looks up the factor for the named latent variable
    pub fn factor(&self, name: &str) -> Option<&F> {
        self.factors.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &F)> {
        self.factors.iter().map(|(n, f)| (n.as_str(), f))
    }
}

impl<F: VariationalFamily> Default for MeanField<F> {
    fn default() -> Self {
        MeanField::new()
    }
}

///
/// Result of a completed (or cancelled) variational fit
///
#[derive(Debug, Clone)]
pub struct FitOutput<F> {
    /// Fitted factorized posterior approximation
    pub posterior: MeanField<F>,
    /// Per-iteration ELBO estimates
    pub trace: FitTrace,
    /// Why the optimization loop stopped
    pub stop: StopReason,
    /// Number of iterations actually run
    pub iterations: usize
}

///
/// Fits a mean-field approximation to a model's posterior via stochastic
/// gradient ascent on the ELBO, using the score-function gradient estimator
/// with a leave-one-out baseline
///
#[derive(Debug)]
pub struct MeanFieldInference<'a, M> {
    model: &'a M,
    data: DenseVector,
    config: FitConfig
}

impl<'a, M: DensityModel> MeanFieldInference<'a, M> {

    ///
    /// Prepares a fitting run, validating the configuration and data
    /// shape before any iteration executes
    ///
    /// # Arguments
    ///
    /// `model` - the probability model to approximate
    /// `data` - the observed data
    /// `config` - the fit configuration
    ///
    pub fn new(
        model: &'a M,
        data: impl Observations,
        config: FitConfig
    ) -> Result<MeanFieldInference<'a, M>, InferenceError> {
        config.validate()?;
        let data = data.into_vector();
        if data.len() != model.observation_count() {
            return Err(InferenceError::DimensionMismatch {
                expected: model.observation_count(),
                actual: data.len()
            });
        }
        Ok(MeanFieldInference { model, data, config })
    }

    ///
    /// Runs the fit with a random source seeded from the configuration
    ///
    /// # Arguments
    ///
    /// `q_init` - the initial variational distribution
    ///
    pub fn run<F: VariationalFamily>(
        &self,
        q_init: MeanField<F>
    ) -> Result<FitOutput<F>, InferenceError> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.run_with_rng(q_init, &mut rng)
    }

    ///
    /// Runs the fit with a caller-owned random source
    ///
    /// # Arguments
    ///
    /// `q_init` - the initial variational distribution
    /// `rng` - the random source
    ///
    pub fn run_with_rng<F: VariationalFamily, R: Rng>(
        &self,
        q_init: MeanField<F>,
        rng: &mut R
    ) -> Result<FitOutput<F>, InferenceError> {
        self.run_cancellable(q_init, rng, &CancelToken::new())
    }

    ///
    /// Runs the fit, checking the provided token between iterations;
    /// a cancelled run returns its partial progress rather than an error
    ///
    /// # Arguments
    ///
    /// `q_init` - the initial variational distribution
    /// `rng` - the random source
    /// `token` - the cancellation token
    ///
    pub fn run_cancellable<F: VariationalFamily, R: Rng>(
        &self,
        q_init: MeanField<F>,
        rng: &mut R,
        token: &CancelToken
    ) -> Result<FitOutput<F>, InferenceError> {
        let mut problem = Problem::new(self.model, &self.data, &self.config, q_init)?;
        // ascend the variational lower bound for the configured budget
        for iter in 0..self.config.max_iter {
            if token.is_cancelled() {
                return Ok(problem.finish(StopReason::Cancelled, iter));
            }
            let elbo = problem.step(iter, rng)?;
            if self.config.verbose && (iter + 1) % self.config.report_every == 0 {
                println!("Iteration {}, ELBO = {}", iter + 1, elbo);
            }
            if let Some(tolerance) = self.config.tolerance {
                if let Some(delta) = problem.trace.trailing_delta(self.config.window) {
                    if delta < tolerance {
                        return Ok(problem.finish(StopReason::Converged, iter + 1));
                    }
                }
            }
        }
        Ok(problem.finish(StopReason::MaxIter, self.config.max_iter))
    }
}

// Holds the optimization state for one fitting run; factors are kept
// aligned to the model's declared latent order
struct Problem<'a, M, F> {
    model: &'a M,
    data: &'a DenseVector,
    config: &'a FitConfig,
    factors: Vec<(String, F)>,
    trace: FitTrace
}

impl<'a, M: DensityModel, F: VariationalFamily> Problem<'a, M, F> {

    fn new(
        model: &'a M,
        data: &'a DenseVector,
        config: &'a FitConfig,
        q_init: MeanField<F>
    ) -> Result<Problem<'a, M, F>, InferenceError> {
        let specs = model.latents();
        if q_init.len() != specs.len() {
            let message = format!(
                "Model declares {} latent variables but {} factors were supplied",
                specs.len(), q_init.len()
            );
            return Err(InferenceError::InvalidConfiguration(message));
        }
        let mut supplied = q_init.factors;
        let mut factors = Vec::with_capacity(specs.len());
        for spec in &specs {
            let index = supplied
                .iter()
                .position(|(name, _)| name == &spec.name)
                .ok_or_else(|| InferenceError::InvalidConfiguration(
                    format!("No variational factor supplied for latent '{}'", spec.name)
                ))?;
            let (name, factor) = supplied.swap_remove(index);
            if factor.support() != spec.support {
                let message = format!(
                    "Factor for latent '{}' has support {:?} but the model requires {:?}",
                    name, factor.support(), spec.support
                );
                return Err(InferenceError::UnsupportedFamily(message));
            }
            factors.push((name, factor));
        }
        Ok(Problem { model, data, config, factors, trace: FitTrace::default() })
    }

    // One stochastic gradient ascent step on the ELBO; returns the
    // iteration's objective estimate
    fn step<R: Rng>(&mut self, iter: usize, rng: &mut R) -> Result<f64, InferenceError> {
        let s = self.config.sample_size;
        let k = self.factors.len();

        // joint draws from the current approximation
        let mut draws = vec![vec![0.0; k]; s];
        for draw in draws.iter_mut() {
            for (j, (_, factor)) in self.factors.iter().enumerate() {
                draw[j] = factor.draw(rng);
            }
        }

        // objective values f = log p(data, z) - log q(z)
        let mut objective = vec![0.0; s];
        for (i, z) in draws.iter().enumerate() {
            let log_p = self.model.log_density(self.data, z);
            let log_q: f64 = self.factors
                .iter()
                .enumerate()
                .map(|(j, (_, factor))| factor.ln_density(z[j]))
                .sum();
            let value = log_p - log_q;
            if !value.is_finite() {
                return Err(self.instability(iter, format!("Log-density difference is {}", value)));
            }
            objective[i] = value;
        }
        let total: f64 = objective.iter().sum();

        // score-function gradient per factor, with a leave-one-out baseline
        let eta = self.config.schedule.step_size(iter);
        let mut updated = Vec::with_capacity(k);
        for (j, (name, factor)) in self.factors.iter().enumerate() {
            let mut grad = DenseVector::zeros(factor.num_params());
            for (i, z) in draws.iter().enumerate() {
                let baseline = if s > 1 {
                    (total - objective[i]) / (s as f64 - 1.0)
                } else {
                    0.0
                };
                let score = factor.score(z[j])?;
                grad += score * (objective[i] - baseline);
            }
            grad /= s as f64;
            if grad.iter().any(|g| !g.is_finite()) {
                return Err(self.instability(iter, format!("Non-finite gradient for latent '{}'", name)));
            }
            if let Some(limit) = self.config.grad_clip {
                let norm = grad.norm();
                if norm > limit {
                    grad *= limit / norm;
                }
            }
            let mut phi = factor.params() + grad * eta;
            factor.project(&mut phi);
            if phi.iter().any(|p| !p.is_finite()) {
                return Err(self.instability(iter, format!("Non-finite parameter update for latent '{}'", name)));
            }
            updated.push(phi);
        }

        // commit only once every factor's update is known to be valid
        for ((_, factor), phi) in self.factors.iter_mut().zip(updated.iter()) {
            factor.set_params(phi)?;
        }

        let elbo = mean(&objective);
        self.trace.push(elbo);
        Ok(elbo)
    }

    fn instability(&self, iteration: usize, detail: String) -> InferenceError {
        InferenceError::NumericalInstability {
            iteration,
            detail,
            last_valid: PartialFit {
                parameters: self.factors
                    .iter()
                    .map(|(name, factor)| (name.clone(), factor.params()))
                    .collect(),
                trace: self.trace.values().to_vec()
            }
        }
    }

    fn finish(self, stop: StopReason, iterations: usize) -> FitOutput<F> {
        FitOutput {
            posterior: MeanField { factors: self.factors },
            trace: self.trace,
            stop,
            iterations
        }
    }
}
