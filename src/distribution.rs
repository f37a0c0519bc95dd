use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Beta as BetaSampler, Gamma as GammaSampler, Distribution};
use serde::{Serialize, Deserialize};
use special::Gamma;

use crate::error::InferenceError;
use crate::math::ln_beta_fn;

type DenseVector = DVector<f64>;

/// Smallest admissible shape/rate parameter after a projected update;
/// large enough that a floored factor still has a usable density
pub const PARAM_FLOOR: f64 = 1e-2;

// margin keeping draws strictly inside an open support boundary, so a
// sample rounded to the boundary in f64 cannot yield a log density of -inf
const DRAW_EPS: f64 = 1e-12;

///
/// Support constraint for a scalar latent variable
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Support {
    /// The open unit interval (0, 1)
    UnitInterval,
    /// The positive half line
    Positive,
    /// The whole real line
    Real
}

///
/// A parameterized scalar distribution usable as a mean-field factor
///
/// Beyond sampling and log-density evaluation, a factor must expose the
/// gradient of its log-density with respect to its own parameters (the
/// score function). This is the only gradient the fitting loop ever
/// requires, which is what keeps the probability model a black box.
///
pub trait VariationalFamily {

    /// Support of the factor
    fn support(&self) -> Support;

    /// Number of free parameters
    fn num_params(&self) -> usize;

    /// Current parameter vector
    fn params(&self) -> DenseVector;

    ///
    /// Replaces the parameter vector, enforcing domain constraints
    ///
    /// # Arguments
    ///
    /// `phi` - the new parameter vector
    ///
    fn set_params(&mut self, phi: &DenseVector) -> Result<(), InferenceError>;

    ///
    /// Projects a proposed parameter vector back onto the valid domain
    ///
    /// # Arguments
    ///
    /// `phi` - the proposed (possibly out-of-domain) parameter vector
    ///
    fn project(&self, phi: &mut DenseVector);

    ///
    /// Single draw from the factor
    ///
    /// # Arguments
    ///
    /// `rng` - the random source
    ///
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64;

    ///
    /// Log density at `x`
    ///
    fn ln_density(&self, x: f64) -> f64;

    ///
    /// Gradient of the log density at `x` with respect to the parameters
    ///
    fn score(&self, x: f64) -> Result<DenseVector, InferenceError>;

    /// Mean of the factor under its current parameters
    fn mean(&self) -> f64;
}

///
/// Beta distribution with two positive shape parameters
///
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BetaDistribution {
    alpha: f64,
    beta: f64
}

impl BetaDistribution {

    ///
    /// Constructs a new Beta distribution
    ///
    /// # Arguments
    ///
    /// `alpha` - first shape parameter
    /// `beta` - second shape parameter
    ///
    pub fn new(alpha: f64, beta: f64) -> Result<BetaDistribution, InferenceError> {
        if alpha <= 0.0 {
            Err(InferenceError::InvalidConfiguration(String::from("Alpha shape parameter must be positive")))
        } else if beta <= 0.0 {
            Err(InferenceError::InvalidConfiguration(String::from("Beta shape parameter must be positive")))
        } else {
            Ok(BetaDistribution { alpha, beta })
        }
    }

    /// The Beta(1, 1) distribution
    pub fn uniform() -> BetaDistribution {
        BetaDistribution { alpha: 1.0, beta: 1.0 }
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    #[inline]
    pub fn variance(&self) -> f64 {
        let total = self.alpha + self.beta;
        (self.alpha * self.beta) / (total * total * (total + 1.0))
    }
}

impl VariationalFamily for BetaDistribution {

    fn support(&self) -> Support {
        Support::UnitInterval
    }

    fn num_params(&self) -> usize {
        2
    }

    fn params(&self) -> DenseVector {
        DenseVector::from_vec(vec![self.alpha, self.beta])
    }

    fn set_params(&mut self, phi: &DenseVector) -> Result<(), InferenceError> {
        if phi.len() != 2 {
            return Err(InferenceError::DimensionMismatch { expected: 2, actual: phi.len() });
        }
        let updated = BetaDistribution::new(phi[0], phi[1])?;
        *self = updated;
        Ok(())
    }

    fn project(&self, phi: &mut DenseVector) {
        for i in 0..phi.len() {
            if phi[i] < PARAM_FLOOR {
                phi[i] = PARAM_FLOOR;
            }
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match BetaSampler::new(self.alpha, self.beta) {
            Ok(sampler) => {
                let x: f64 = sampler.sample(rng);
                x.max(DRAW_EPS).min(1.0 - DRAW_EPS)
            },
            // unreachable for in-domain parameters; a NaN draw trips the
            // fitter's finite checks instead of panicking
            Err(_) => f64::NAN
        }
    }

    fn ln_density(&self, x: f64) -> f64 {
        // skip zero-exponent terms so that 0 * ln(0) does not produce NaN
        // at the support boundary
        let mut value = -ln_beta_fn(self.alpha, self.beta);
        if self.alpha != 1.0 {
            value += (self.alpha - 1.0) * x.ln();
        }
        if self.beta != 1.0 {
            value += (self.beta - 1.0) * (1.0 - x).ln();
        }
        value
    }

    fn score(&self, x: f64) -> Result<DenseVector, InferenceError> {
        let psi_total = Gamma::digamma(self.alpha + self.beta);
        let d_alpha = x.ln() - Gamma::digamma(self.alpha) + psi_total;
        let d_beta = (1.0 - x).ln() - Gamma::digamma(self.beta) + psi_total;
        Ok(DenseVector::from_vec(vec![d_alpha, d_beta]))
    }

    fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

///
/// Gamma distribution with positive shape and rate parameters
///
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GammaDistribution {
    shape: f64,
    rate: f64
}

impl GammaDistribution {

    ///
    /// Constructs a new Gamma distribution
    ///
    /// # Arguments
    ///
    /// `shape` - the shape parameter
    /// `rate` - the rate (inverse scale) parameter
    ///
    pub fn new(shape: f64, rate: f64) -> Result<GammaDistribution, InferenceError> {
        if shape <= 0.0 {
            Err(InferenceError::InvalidConfiguration(String::from("Shape parameter must be positive")))
        } else if rate <= 0.0 {
            Err(InferenceError::InvalidConfiguration(String::from("Rate parameter must be positive")))
        } else {
            Ok(GammaDistribution { shape, rate })
        }
    }

    #[inline]
    pub fn shape(&self) -> f64 {
        self.shape
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl VariationalFamily for GammaDistribution {

    fn support(&self) -> Support {
        Support::Positive
    }

    fn num_params(&self) -> usize {
        2
    }

    fn params(&self) -> DenseVector {
        DenseVector::from_vec(vec![self.shape, self.rate])
    }

    fn set_params(&mut self, phi: &DenseVector) -> Result<(), InferenceError> {
        if phi.len() != 2 {
            return Err(InferenceError::DimensionMismatch { expected: 2, actual: phi.len() });
        }
        let updated = GammaDistribution::new(phi[0], phi[1])?;
        *self = updated;
        Ok(())
    }

    fn project(&self, phi: &mut DenseVector) {
        for i in 0..phi.len() {
            if phi[i] < PARAM_FLOOR {
                phi[i] = PARAM_FLOOR;
            }
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match GammaSampler::new(self.shape, 1.0 / self.rate) {
            Ok(sampler) => {
                let x: f64 = sampler.sample(rng);
                x.max(DRAW_EPS)
            },
            Err(_) => f64::NAN
        }
    }

    fn ln_density(&self, x: f64) -> f64 {
        let mut value = self.shape * self.rate.ln() - Gamma::ln_gamma(self.shape).0 - self.rate * x;
        if self.shape != 1.0 {
            value += (self.shape - 1.0) * x.ln();
        }
        value
    }

    fn score(&self, x: f64) -> Result<DenseVector, InferenceError> {
        let d_shape = self.rate.ln() - Gamma::digamma(self.shape) + x.ln();
        let d_rate = self.shape / self.rate - x;
        Ok(DenseVector::from_vec(vec![d_shape, d_rate]))
    }

    fn mean(&self) -> f64 {
        self.shape / self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // central finite difference of ln q(x; phi) along parameter i
    fn numeric_score<F, C>(construct: C, phi: &[f64], x: f64, i: usize) -> f64
    where
        F: VariationalFamily,
        C: Fn(f64, f64) -> F
    {
        let h = 1e-6;
        let mut lo = [phi[0], phi[1]];
        let mut hi = [phi[0], phi[1]];
        lo[i] -= h;
        hi[i] += h;
        let f_lo = construct(lo[0], lo[1]).ln_density(x);
        let f_hi = construct(hi[0], hi[1]).ln_density(x);
        (f_hi - f_lo) / (2.0 * h)
    }

    #[test]
    fn test_beta_new_rejects_nonpositive_shapes() {
        assert!(BetaDistribution::new(0.0, 1.0).is_err());
        assert!(BetaDistribution::new(1.0, -2.0).is_err());
    }

    #[test]
    fn test_beta_ln_density() {
        let q = BetaDistribution::new(2.0, 3.0).unwrap();
        // pdf of Beta(2, 3) at 0.5 is 12 * 0.5 * 0.25 = 1.5
        assert_approx_eq!(q.ln_density(0.5), 1.5f64.ln());
    }

    #[test]
    fn test_beta_score_matches_finite_difference() {
        let q = BetaDistribution::new(3.0, 9.0).unwrap();
        let score = q.score(0.2).unwrap();
        let construct = |a, b| BetaDistribution::new(a, b).unwrap();
        assert_approx_eq!(score[0], numeric_score(construct, &[3.0, 9.0], 0.2, 0), 1e-4);
        assert_approx_eq!(score[1], numeric_score(construct, &[3.0, 9.0], 0.2, 1), 1e-4);
    }

    #[test]
    fn test_beta_mean_and_variance() {
        let q = BetaDistribution::new(3.0, 9.0).unwrap();
        assert_approx_eq!(q.mean(), 0.25);
        assert_approx_eq!(q.variance(), (3.0 * 9.0) / (144.0 * 13.0));
    }

    #[test]
    fn test_beta_draws_stay_in_support() {
        let q = BetaDistribution::new(2.0, 5.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let x = q.draw(&mut rng);
            assert!(x > 0.0 && x < 1.0);
        }
    }

    #[test]
    fn test_uniform_ln_density_at_endpoints() {
        // zero-exponent terms must not turn into 0 * ln(0) = NaN
        let q = BetaDistribution::uniform();
        assert_eq!(q.ln_density(0.0), 0.0);
        assert_eq!(q.ln_density(1.0), 0.0);
        let q = BetaDistribution::new(1.0, 2.0).unwrap();
        assert_approx_eq!(q.ln_density(0.0), 2f64.ln());
        let q = GammaDistribution::new(1.0, 2.0).unwrap();
        assert_approx_eq!(q.ln_density(0.0), 2f64.ln());
    }

    #[test]
    fn test_draws_from_floor_parameters_stay_interior() {
        // a factor projected onto the floor concentrates mass near the
        // boundary; draws must still have a finite log density
        let q = BetaDistribution::new(2.0, PARAM_FLOOR).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let x = q.draw(&mut rng);
            assert!(x > 0.0 && x < 1.0);
            assert!(q.ln_density(x).is_finite());
        }
    }

    #[test]
    fn test_beta_projection_clamps_to_floor() {
        let q = BetaDistribution::uniform();
        let mut phi = DenseVector::from_vec(vec![-0.5, 2.0]);
        q.project(&mut phi);
        assert_approx_eq!(phi[0], PARAM_FLOOR);
        assert_approx_eq!(phi[1], 2.0);
    }

    #[test]
    fn test_beta_set_params_rejects_wrong_length() {
        let mut q = BetaDistribution::uniform();
        let phi = DenseVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(q.set_params(&phi), Err(InferenceError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_gamma_ln_density() {
        let q = GammaDistribution::new(1.0, 2.0).unwrap();
        // Gamma(1, rate 2) is Exponential(2): ln pdf(x) = ln 2 - 2x
        assert_approx_eq!(q.ln_density(0.5), 2f64.ln() - 1.0);
    }

    #[test]
    fn test_gamma_score_matches_finite_difference() {
        let q = GammaDistribution::new(2.5, 1.5).unwrap();
        let score = q.score(0.8).unwrap();
        let construct = |a, b| GammaDistribution::new(a, b).unwrap();
        assert_approx_eq!(score[0], numeric_score(construct, &[2.5, 1.5], 0.8, 0), 1e-4);
        assert_approx_eq!(score[1], numeric_score(construct, &[2.5, 1.5], 0.8, 1), 1e-4);
    }

    #[test]
    fn test_gamma_mean() {
        let q = GammaDistribution::new(6.0, 2.0).unwrap();
        assert_approx_eq!(q.mean(), 3.0);
    }
}
