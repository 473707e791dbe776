//! Conjugate Gamma updates for the noise precision and the regularization
//! strength.

use super::{BlockStep, OperatorKeys};
use crate::error::SamplingError;
use crate::forward::SignalModel;
use crate::types::Point;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Gamma prior in shape/rate form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    pub shape: f64,
    pub rate: f64,
}

impl GammaPrior {
    pub fn new(shape: f64, rate: f64) -> Result<Self, SamplingError> {
        for (name, value) in [("shape", shape), ("rate", rate)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SamplingError::InvalidHyperparameter {
                    name: format!("prior {name}"),
                    value,
                });
            }
        }
        Ok(Self { shape, rate })
    }

    /// Draws from the posterior after `count` Gaussian terms with total
    /// squared residual `sum_sq`.
    fn posterior_draw(
        &self,
        count: usize,
        sum_sq: f64,
        name: &str,
        rng: &mut StdRng,
    ) -> Result<f64, SamplingError> {
        let shape = self.shape + 0.5 * count as f64;
        let rate = self.rate + 0.5 * sum_sq;
        let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| {
            SamplingError::InvalidConfiguration(format!(
                "invalid Gamma posterior for {name} (shape {shape}, rate {rate}): {e}"
            ))
        })?;
        Ok(gamma.sample(rng))
    }
}

/// Draws `tau ~ Gamma(a + nt/2, b + ‖V - K·P‖²/2)`.
pub struct NoisePrecisionStep {
    vars: Vec<String>,
    distribution: String,
    keys: OperatorKeys,
    model: Arc<SignalModel>,
    prior: GammaPrior,
}

impl NoisePrecisionStep {
    pub fn new(
        var: impl Into<String>,
        distribution: impl Into<String>,
        keys: OperatorKeys,
        model: Arc<SignalModel>,
        prior: GammaPrior,
    ) -> Self {
        Self {
            vars: vec![var.into()],
            distribution: distribution.into(),
            keys,
            model,
            prior,
        }
    }
}

impl BlockStep for NoisePrecisionStep {
    fn name(&self) -> &str {
        "tau | P, k, lamb, V0"
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError> {
        let p = point.vector(&self.distribution)?;
        if p.len() != self.model.nr() {
            return Err(SamplingError::DimensionMismatch {
                what: "distance distribution",
                expected: self.model.nr(),
                found: p.len(),
            });
        }
        let k = self.keys.operator(&self.model, point)?;
        let residual = self.model.signal() - &k.dot(p);
        let sum_sq = residual.dot(&residual);
        let tau = self
            .prior
            .posterior_draw(self.model.nt(), sum_sq, &self.vars[0], rng)?;
        Ok(point.with(self.vars[0].as_str(), tau))
    }
}

/// Draws `delta ~ Gamma(a + rows(L)/2, b + ‖L·P‖²/2)`.
pub struct RegularizationStep {
    vars: Vec<String>,
    distribution: String,
    l: Arc<Array2<f64>>,
    prior: GammaPrior,
}

impl RegularizationStep {
    pub fn new(
        var: impl Into<String>,
        distribution: impl Into<String>,
        l: Arc<Array2<f64>>,
        prior: GammaPrior,
    ) -> Self {
        Self {
            vars: vec![var.into()],
            distribution: distribution.into(),
            l,
            prior,
        }
    }
}

impl BlockStep for RegularizationStep {
    fn name(&self) -> &str {
        "delta | P"
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError> {
        let p = point.vector(&self.distribution)?;
        if p.len() != self.l.ncols() {
            return Err(SamplingError::DimensionMismatch {
                what: "distance distribution",
                expected: self.l.ncols(),
                found: p.len(),
            });
        }
        let lp = self.l.dot(p);
        let delta = self
            .prior
            .posterior_draw(self.l.nrows(), lp.dot(&lp), &self.vars[0], rng)?;
        Ok(point.with(self.vars[0].as_str(), delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::regularization_operator;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn prior_rejects_nonpositive_parameters() {
        assert!(GammaPrior::new(1.0, 0.0).is_err());
        assert!(GammaPrior::new(f64::NAN, 1.0).is_err());
        assert!(GammaPrior::new(1.0, 1e-4).is_ok());
    }

    #[test]
    fn regularization_draws_concentrate_on_conjugate_mean() {
        let l = Arc::new(regularization_operator(5, 2).unwrap());
        let prior = GammaPrior::new(1.0, 1.0).unwrap();
        let step = RegularizationStep::new("delta", "P", l, prior);
        let point = Point::new()
            .set("P", array![0.0, 1.0, 0.0, 1.0, 0.0])
            .set("delta", 1.0);
        // ‖LP‖² = 4 + 4 + 4 = 12, rows = 3 → Gamma(2.5, 7), mean 5/14
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20_000;
        let mut mean = 0.0;
        for _ in 0..n {
            mean += step.step(&point, &mut rng).unwrap().scalar("delta").unwrap();
        }
        mean /= n as f64;
        assert!((mean - 2.5 / 7.0).abs() < 0.01, "mean {mean}");
        assert_eq!(point.scalar("delta").unwrap(), 1.0);
    }
}
