//! Synthetic distance distributions and signals for tests and demonstrations.

use crate::error::SamplingError;
use crate::forward::{ForwardModel, assemble_forward_operator, distance_increment};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// `FWHM / (2·√(2 ln 2))`.
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt())
}

/// `σ · 2·√(2 ln 2)`.
pub fn sigma_to_fwhm(sigma: f64) -> f64 {
    sigma * 2.0 * (2.0 * std::f64::consts::LN_2).sqrt()
}

/// Gaussian bump centred at `r0`, normalized so that `Σ P · dr = 1` on the grid.
pub fn gaussian_distribution(
    r: ArrayView1<'_, f64>,
    r0: f64,
    fwhm: f64,
) -> Result<Array1<f64>, SamplingError> {
    if !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(SamplingError::InvalidHyperparameter {
            name: "fwhm".to_string(),
            value: fwhm,
        });
    }
    let dr = distance_increment(r)?;
    let sigma = fwhm_to_sigma(fwhm);
    let mut p = r.mapv(|ri| (-0.5 * ((ri - r0) / sigma).powi(2)).exp());
    let area = p.sum() * dr;
    if area > 0.0 {
        p /= area;
    }
    Ok(p)
}

/// Noise-free signal `K · P` for the given background rate, modulation depth
/// and signal scale.
pub fn simulate_signal(
    model: &dyn ForwardModel,
    t: ArrayView1<'_, f64>,
    r: ArrayView1<'_, f64>,
    p: ArrayView1<'_, f64>,
    rate: f64,
    lamb: f64,
    v0: f64,
) -> Result<Array1<f64>, SamplingError> {
    if p.len() != r.len() {
        return Err(SamplingError::DimensionMismatch {
            what: "distance distribution",
            expected: r.len(),
            found: p.len(),
        });
    }
    let k0 = model.kernel(t, r)?;
    let background = model.background(t, rate);
    let dr = distance_increment(r)?;
    let k = assemble_forward_operator(k0.view(), background.view(), lamb, v0, dr)?;
    Ok(k.dot(&p))
}

/// Adds i.i.d. `N(0, sigma²)` noise.
pub fn add_noise<R: Rng + ?Sized>(
    v: ArrayView1<'_, f64>,
    sigma: f64,
    rng: &mut R,
) -> Result<Array1<f64>, SamplingError> {
    let normal = Normal::new(0.0, sigma).map_err(|e| {
        SamplingError::InvalidConfiguration(format!("invalid noise level {sigma}: {e}"))
    })?;
    Ok(v.mapv(|vi| vi + normal.sample(&mut *rng)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::DipolarModel;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn fwhm_conversion_round_trips() {
        assert_relative_eq!(sigma_to_fwhm(fwhm_to_sigma(0.7)), 0.7, max_relative = 1e-15);
        assert_relative_eq!(sigma_to_fwhm(1.0), 2.354_820_045, max_relative = 1e-9);
    }

    #[test]
    fn gaussian_distribution_has_unit_area() {
        let r = Array1::linspace(2.0, 6.0, 81);
        let p = gaussian_distribution(r.view(), 4.0, 0.5).unwrap();
        assert_abs_diff_eq!(p.sum() * 0.05, 1.0, epsilon = 1e-12);
        let peak = p.iter().cloned().fold(0.0, f64::max);
        assert_eq!(p[40], peak);
    }

    #[test]
    fn simulated_signal_starts_at_v0() {
        // K(t = 0) = 1 so V(0) = V0 · Σ P dr = V0
        let t = Array1::linspace(0.0, 2.0, 21);
        let r = Array1::linspace(2.0, 6.0, 41);
        let p = gaussian_distribution(r.view(), 3.5, 0.4).unwrap();
        let v = simulate_signal(&DipolarModel, t.view(), r.view(), p.view(), 0.1, 0.4, 1.2).unwrap();
        assert_abs_diff_eq!(v[0], 1.2, epsilon = 1e-12);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn noise_is_reproducible_and_rejects_negative_sigma() {
        let v = Array1::zeros(50);
        let a = add_noise(v.view(), 0.1, &mut StdRng::seed_from_u64(4)).unwrap();
        let b = add_noise(v.view(), 0.1, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(a, b);
        assert!(add_noise(v.view(), -1.0, &mut StdRng::seed_from_u64(4)).is_err());
    }
}
