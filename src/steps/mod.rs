//! Block-Gibbs steps that plug into the chain driver.
//!
//! Every step owns a fixed set of variables, reads whatever else it needs from
//! the current point, and returns a new point in which only its own variables
//! differ.

pub mod distribution;
pub mod hyper;

use crate::error::SamplingError;
use crate::forward::SignalModel;
use crate::transforms::resolve_scalar;
use crate::types::Point;
use ndarray::Array2;
use rand::rngs::StdRng;

pub use distribution::{ExpandedDistributionStep, FixedNoiseDistributionStep, SignalDistributionStep};
pub use hyper::{GammaPrior, NoisePrecisionStep, RegularizationStep};

/// Step contract shared by the custom Gibbs updates and any external sampler.
pub trait BlockStep: Send + Sync {
    /// Display name used in logs.
    fn name(&self) -> &str;

    /// Variables this step replaces.
    fn vars(&self) -> &[String];

    /// Returns a fresh point; `point` itself is never modified.
    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError>;
}

/// How the noise level of the signal is stored in the point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseParameter {
    /// Noise standard deviation `sigma`; `tau = 1 / sigma²`.
    Scale(String),
    /// Noise precision `tau`, read directly.
    Precision(String),
}

impl NoiseParameter {
    pub fn key(&self) -> &str {
        match self {
            NoiseParameter::Scale(key) | NoiseParameter::Precision(key) => key,
        }
    }

    /// Natural-scale noise precision at `point`.
    pub fn tau(&self, point: &Point) -> Result<f64, SamplingError> {
        match self {
            NoiseParameter::Scale(key) => {
                let sigma = resolve_scalar(point, key)?;
                Ok(1.0 / (sigma * sigma))
            }
            NoiseParameter::Precision(key) => resolve_scalar(point, key),
        }
    }
}

/// Keys of the scalars that enter the full forward operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorKeys {
    /// Background decay rate `k`.
    pub rate: String,
    /// Modulation depth `λ`.
    pub lamb: String,
    /// Signal scale `V0`.
    pub v0: String,
}

impl OperatorKeys {
    pub fn new(rate: impl Into<String>, lamb: impl Into<String>, v0: impl Into<String>) -> Self {
        Self {
            rate: rate.into(),
            lamb: lamb.into(),
            v0: v0.into(),
        }
    }

    /// Rebuilds `K` from the natural-scale values at `point`.
    pub fn operator(&self, model: &SignalModel, point: &Point) -> Result<Array2<f64>, SamplingError> {
        let rate = resolve_scalar(point, &self.rate)?;
        let lamb = resolve_scalar(point, &self.lamb)?;
        let v0 = resolve_scalar(point, &self.v0)?;
        model.operator(rate, lamb, v0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn noise_scale_is_converted_to_precision() {
        let point = Point::new().set("sigma_log__", 0.1_f64.ln()).set("tau", 50.0);
        let scale = NoiseParameter::Scale("sigma_log__".into());
        assert_abs_diff_eq!(scale.tau(&point).unwrap(), 100.0, epsilon = 1e-9);
        let precision = NoiseParameter::Precision("tau".into());
        assert_eq!(precision.tau(&point).unwrap(), 50.0);
        assert_eq!(precision.key(), "tau");
    }
}
