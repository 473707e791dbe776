//! Gibbs updates of the distance distribution `P`.
//!
//! Three variants differ only in which hyperparameters are live and how much
//! of the normal equations has to be rebuilt per call:
//!
//! * [`FixedNoiseDistributionStep`]: noise level fixed, all matrices fixed.
//! * [`ExpandedDistributionStep`]: noise and signal scale `V0` live, `KᵀS / V0`
//!   recomputed.
//! * [`SignalDistributionStep`]: noise, background rate, modulation depth and
//!   `V0` live, `K`, `KᵀK` and `KᵀV` rebuilt.

use super::{BlockStep, NoiseParameter, OperatorKeys};
use crate::error::SamplingError;
use crate::forward::{SignalModel, normal_equations};
use crate::posterior::rand_p;
use crate::transforms::resolve_scalar;
use crate::types::Point;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use std::sync::Arc;

fn check_square(what: &'static str, m: &Array2<f64>, nr: usize) -> Result<(), SamplingError> {
    if m.nrows() != nr || m.ncols() != nr {
        return Err(SamplingError::DimensionMismatch {
            what,
            expected: nr,
            found: if m.nrows() != nr { m.nrows() } else { m.ncols() },
        });
    }
    Ok(())
}

/// Draws `P` with a fixed noise level and precomputed `KᵀK`, `KᵀS`.
pub struct FixedNoiseDistributionStep {
    vars: Vec<String>,
    delta: String,
    sigma: f64,
    ktk: Array2<f64>,
    kts: Array1<f64>,
    ltl: Arc<Array2<f64>>,
}

impl FixedNoiseDistributionStep {
    /// `sigma` is configuration and is used as given.
    pub fn new(
        var: impl Into<String>,
        delta: impl Into<String>,
        sigma: f64,
        ktk: Array2<f64>,
        kts: Array1<f64>,
        ltl: Arc<Array2<f64>>,
    ) -> Result<Self, SamplingError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(SamplingError::InvalidHyperparameter {
                name: "sigma".to_string(),
                value: sigma,
            });
        }
        let nr = kts.len();
        check_square("KtK", &ktk, nr)?;
        check_square("LtL", &ltl, nr)?;
        Ok(Self {
            vars: vec![var.into()],
            delta: delta.into(),
            sigma,
            ktk,
            kts,
            ltl,
        })
    }
}

impl BlockStep for FixedNoiseDistributionStep {
    fn name(&self) -> &str {
        "P | delta (fixed noise)"
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError> {
        let tau = 1.0 / (self.sigma * self.sigma);
        let delta = resolve_scalar(point, &self.delta)?;
        let p = rand_p(delta, tau, &self.ktk, &self.kts, &self.ltl, self.kts.len(), rng)?;
        Ok(point.with(self.vars[0].as_str(), p))
    }
}

/// Draws `P` with live noise and signal scale; `KᵀS` is divided by `V0`.
pub struct ExpandedDistributionStep {
    vars: Vec<String>,
    delta: String,
    noise: NoiseParameter,
    v0: String,
    ktk: Array2<f64>,
    kts: Array1<f64>,
    ltl: Arc<Array2<f64>>,
}

impl ExpandedDistributionStep {
    pub fn new(
        var: impl Into<String>,
        delta: impl Into<String>,
        noise: NoiseParameter,
        v0: impl Into<String>,
        ktk: Array2<f64>,
        kts: Array1<f64>,
        ltl: Arc<Array2<f64>>,
    ) -> Result<Self, SamplingError> {
        let nr = kts.len();
        check_square("KtK", &ktk, nr)?;
        check_square("LtL", &ltl, nr)?;
        Ok(Self {
            vars: vec![var.into()],
            delta: delta.into(),
            noise,
            v0: v0.into(),
            ktk,
            kts,
            ltl,
        })
    }
}

impl BlockStep for ExpandedDistributionStep {
    fn name(&self) -> &str {
        "P | delta, noise, V0"
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError> {
        let tau = self.noise.tau(point)?;
        let delta = resolve_scalar(point, &self.delta)?;
        let v0 = resolve_scalar(point, &self.v0)?;
        let kts = &self.kts / v0;
        let p = rand_p(delta, tau, &self.ktk, &kts, &self.ltl, kts.len(), rng)?;
        Ok(point.with(self.vars[0].as_str(), p))
    }
}

/// Draws `P` after rebuilding the full operator from the current background
/// rate, modulation depth and `V0`.
pub struct SignalDistributionStep {
    vars: Vec<String>,
    delta: String,
    noise: NoiseParameter,
    keys: OperatorKeys,
    model: Arc<SignalModel>,
    ltl: Arc<Array2<f64>>,
}

impl SignalDistributionStep {
    pub fn new(
        var: impl Into<String>,
        delta: impl Into<String>,
        noise: NoiseParameter,
        keys: OperatorKeys,
        model: Arc<SignalModel>,
        ltl: Arc<Array2<f64>>,
    ) -> Result<Self, SamplingError> {
        check_square("LtL", &ltl, model.nr())?;
        Ok(Self {
            vars: vec![var.into()],
            delta: delta.into(),
            noise,
            keys,
            model,
            ltl,
        })
    }
}

impl BlockStep for SignalDistributionStep {
    fn name(&self) -> &str {
        "P | delta, noise, k, lamb, V0"
    }

    fn vars(&self) -> &[String] {
        &self.vars
    }

    fn step(&self, point: &Point, rng: &mut StdRng) -> Result<Point, SamplingError> {
        let tau = self.noise.tau(point)?;
        let delta = resolve_scalar(point, &self.delta)?;
        let k = self.keys.operator(&self.model, point)?;
        let (ktk, ktv) = normal_equations(k.view(), self.model.signal().view())?;
        let p = rand_p(delta, tau, &ktk, &ktv, &self.ltl, self.model.nr(), rng)?;
        Ok(point.with(self.vars[0].as_str(), p))
    }
}
