use special::Gamma;

///
/// Natural log of the Beta function
///
/// # Arguments
///
/// `a` - first shape argument
/// `b` - second shape argument
///
#[inline]
pub fn ln_beta_fn(a: f64, b: f64) -> f64 {
    Gamma::ln_gamma(a).0 + Gamma::ln_gamma(b).0 - Gamma::ln_gamma(a + b).0
}

///
/// Arithmetic mean of a slice of values
///
/// # Arguments
///
/// `values` - the (non-empty) values
///
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
