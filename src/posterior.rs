//! One conditional draw of the nonnegative distance distribution.
//!
//! Bardsley & Fox (2012): with `Q = tau·KᵀK + delta·LᵀL` and a perturbation
//! `w ~ N(0, Q)`, the projection `argmin_{P ≥ 0} ½PᵀQP - Pᵀ(tau·KᵀS + w)` is
//! an approximate sample from the nonnegativity-constrained Gaussian posterior.

use crate::error::SamplingError;
use crate::gaussian::{CovarianceFactor, draw_perturbation};
use crate::solver::nnls::{NnlsOptions, NnlsSolution, fnnls_with_options};
use ndarray::{Array1, Array2};
use rand::Rng;

/// Normal-equation blocks of the linear Gaussian model for `P`.
pub struct ConditionalSystem<'a> {
    pub delta: f64,
    pub tau: f64,
    pub ktk: &'a Array2<f64>,
    pub kts: &'a Array1<f64>,
    pub ltl: &'a Array2<f64>,
}

impl ConditionalSystem<'_> {
    fn validate(&self, nr: usize) -> Result<(), SamplingError> {
        for (name, value) in [("delta", self.delta), ("tau", self.tau)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(SamplingError::InvalidHyperparameter {
                    name: name.to_string(),
                    value,
                });
            }
        }
        for (what, dim) in [("KtK", self.ktk.dim()), ("LtL", self.ltl.dim())] {
            if dim.0 != nr || dim.1 != nr {
                return Err(SamplingError::DimensionMismatch {
                    what,
                    expected: nr,
                    found: if dim.0 != nr { dim.0 } else { dim.1 },
                });
            }
        }
        if self.kts.len() != nr {
            return Err(SamplingError::DimensionMismatch {
                what: "KtS",
                expected: nr,
                found: self.kts.len(),
            });
        }
        Ok(())
    }

    /// `tau·KᵀK + delta·LᵀL`.
    pub fn precision(&self) -> Array2<f64> {
        self.ktk * self.tau + self.ltl * self.delta
    }
}

/// Draws `P ≥ 0` and returns the full solver record.
pub fn rand_p_with_options<R: Rng + ?Sized>(
    system: &ConditionalSystem<'_>,
    nr: usize,
    options: &NnlsOptions,
    rng: &mut R,
) -> Result<NnlsSolution, SamplingError> {
    system.validate(nr)?;
    let precision = system.precision();
    let factor = CovarianceFactor::from_precision(&precision)?;
    let w = draw_perturbation(&factor, rng);
    let rhs = system.kts * system.tau + &w;
    Ok(fnnls_with_options(&precision, &rhs, options)?)
}

/// Draws `P ≥ 0` from its conditional posterior given `delta` and `tau`.
pub fn rand_p<R: Rng + ?Sized>(
    delta: f64,
    tau: f64,
    ktk: &Array2<f64>,
    kts: &Array1<f64>,
    ltl: &Array2<f64>,
    nr: usize,
    rng: &mut R,
) -> Result<Array1<f64>, SamplingError> {
    let system = ConditionalSystem {
        delta,
        tau,
        ktk,
        kts,
        ltl,
    };
    Ok(rand_p_with_options(&system, nr, &NnlsOptions::default(), rng)?.x)
}
