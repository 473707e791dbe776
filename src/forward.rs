//! Forward operator for dipolar signals.
//!
//! A time trace `V(t)` is modelled as `V = K · P` with
//! `K = V0 · dr · ((1 - λ) + λ·K0) ⊙ B(t, k)[:, None]`, where `K0` is the
//! unscaled dipolar kernel on the `(t, r)` grid and `B` the background decay.

use crate::error::SamplingError;
use crate::linalg::faer_ndarray::{fast_ata, fast_atv};
use crate::quadrature::panel_rule;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::sync::Arc;

/// Dipolar coupling constant for two g ≈ 2 spins, in MHz·nm³.
pub const DIPOLAR_FREQUENCY_MHZ_NM3: f64 = 52.04;

/// Numerical contract for the kernel and background used by the signal model.
///
/// Implementations must be deterministic for identical inputs.
pub trait ForwardModel: Send + Sync {
    /// Unscaled kernel matrix of shape `(t.len(), r.len())`.
    fn kernel(&self, t: ArrayView1<'_, f64>, r: ArrayView1<'_, f64>)
    -> Result<Array2<f64>, SamplingError>;

    /// Background decay evaluated on `t` for the given rate.
    fn background(&self, t: ArrayView1<'_, f64>, rate: f64) -> Array1<f64>;
}

/// Powder-averaged dipolar kernel with an exponential background.
#[derive(Debug, Clone, Copy, Default)]
pub struct DipolarModel;

impl ForwardModel for DipolarModel {
    fn kernel(
        &self,
        t: ArrayView1<'_, f64>,
        r: ArrayView1<'_, f64>,
    ) -> Result<Array2<f64>, SamplingError> {
        dipolar_kernel(t, r)
    }

    fn background(&self, t: ArrayView1<'_, f64>, rate: f64) -> Array1<f64> {
        exponential_background(t, rate)
    }
}

/// `K[i, j] = ∫₀¹ cos(ω_j |t_i| (1 - 3x²)) dx` with `ω_j = 2π·52.04 / r_j³`.
///
/// `t` is in microseconds and `r` in nanometres. The integral is evaluated by
/// composite Gauss-Legendre quadrature with enough panels to resolve the
/// oscillation, so `K = 1` exactly at `t = 0`.
pub fn dipolar_kernel(
    t: ArrayView1<'_, f64>,
    r: ArrayView1<'_, f64>,
) -> Result<Array2<f64>, SamplingError> {
    if let Some((index, &value)) = r
        .iter()
        .enumerate()
        .find(|(_, v)| !(v.is_finite() && **v > 0.0))
    {
        return Err(SamplingError::InvalidConfiguration(format!(
            "distance r[{index}] = {value} must be finite and positive"
        )));
    }
    let rule = panel_rule()?;
    let nt = t.len();
    let columns: Vec<Array1<f64>> = r
        .to_vec()
        .into_par_iter()
        .map(|rj| {
            let omega = 2.0 * PI * DIPOLAR_FREQUENCY_MHZ_NM3 / (rj * rj * rj);
            Array1::from_shape_fn(nt, |i| {
                let phase = omega * t[i].abs();
                if phase == 0.0 {
                    return 1.0;
                }
                let panels = (1.5 * phase).ceil() as usize;
                rule.integrate_composite(0.0, 1.0, panels, |x| {
                    (phase * (1.0 - 3.0 * x * x)).cos()
                })
            })
        })
        .collect();

    let mut kernel = Array2::<f64>::zeros((nt, r.len()));
    for (j, column) in columns.into_iter().enumerate() {
        kernel.column_mut(j).assign(&column);
    }
    Ok(kernel)
}

/// `B(t) = exp(-k |t|)`.
pub fn exponential_background(t: ArrayView1<'_, f64>, rate: f64) -> Array1<f64> {
    t.mapv(|ti| (-rate * ti.abs()).exp())
}

/// Finite-difference roughness operator of shape `(n - order) × n`.
pub fn regularization_operator(n: usize, order: usize) -> Result<Array2<f64>, SamplingError> {
    let stencil: &[f64] = match order {
        0 => &[1.0],
        1 => &[-1.0, 1.0],
        2 => &[1.0, -2.0, 1.0],
        _ => {
            return Err(SamplingError::InvalidConfiguration(format!(
                "regularization order must be 0, 1 or 2, got {order}"
            )));
        }
    };
    if n <= order {
        return Err(SamplingError::DimensionMismatch {
            what: "regularization grid length",
            expected: order + 1,
            found: n,
        });
    }
    let rows = n - order;
    let mut l = Array2::<f64>::zeros((rows, n));
    for i in 0..rows {
        for (offset, &c) in stencil.iter().enumerate() {
            l[[i, i + offset]] = c;
        }
    }
    Ok(l)
}

/// Spacing of a uniform distance grid, `r[1] - r[0]`.
pub fn distance_increment(r: ArrayView1<'_, f64>) -> Result<f64, SamplingError> {
    if r.len() < 2 {
        return Err(SamplingError::DimensionMismatch {
            what: "distance grid length",
            expected: 2,
            found: r.len(),
        });
    }
    Ok(r[1] - r[0])
}

/// `V0 · dr · ((1 - λ) + λ·K0) ⊙ B[:, None]`.
pub fn assemble_forward_operator(
    k0: ArrayView2<'_, f64>,
    background: ArrayView1<'_, f64>,
    lamb: f64,
    v0: f64,
    dr: f64,
) -> Result<Array2<f64>, SamplingError> {
    if k0.nrows() != background.len() {
        return Err(SamplingError::DimensionMismatch {
            what: "background length",
            expected: k0.nrows(),
            found: background.len(),
        });
    }
    let scale = v0 * dr;
    let mut k = k0.mapv(|kij| scale * ((1.0 - lamb) + lamb * kij));
    for (mut row, &b) in k.axis_iter_mut(Axis(0)).zip(background.iter()) {
        row *= b;
    }
    Ok(k)
}

/// `(KᵀK, KᵀV)`.
pub fn normal_equations(
    k: ArrayView2<'_, f64>,
    v: ArrayView1<'_, f64>,
) -> Result<(Array2<f64>, Array1<f64>), SamplingError> {
    if k.nrows() != v.len() {
        return Err(SamplingError::DimensionMismatch {
            what: "signal length",
            expected: k.nrows(),
            found: v.len(),
        });
    }
    Ok((fast_ata(&k), fast_atv(&k, &v)))
}

/// Fixed experimental inputs shared by every step that rebuilds the operator.
pub struct SignalModel {
    forward: Arc<dyn ForwardModel>,
    t: Array1<f64>,
    signal: Array1<f64>,
    r: Array1<f64>,
    k0: Array2<f64>,
    dr: f64,
}

impl SignalModel {
    /// Evaluates the kernel once on `(t, r)`.
    pub fn new(
        forward: Arc<dyn ForwardModel>,
        t: Array1<f64>,
        signal: Array1<f64>,
        r: Array1<f64>,
    ) -> Result<Self, SamplingError> {
        let k0 = forward.kernel(t.view(), r.view())?;
        Self::with_kernel(forward, k0, t, signal, r)
    }

    /// Uses a precomputed kernel `K0`.
    pub fn with_kernel(
        forward: Arc<dyn ForwardModel>,
        k0: Array2<f64>,
        t: Array1<f64>,
        signal: Array1<f64>,
        r: Array1<f64>,
    ) -> Result<Self, SamplingError> {
        if signal.len() != t.len() {
            return Err(SamplingError::DimensionMismatch {
                what: "signal length",
                expected: t.len(),
                found: signal.len(),
            });
        }
        if k0.nrows() != t.len() {
            return Err(SamplingError::DimensionMismatch {
                what: "kernel rows",
                expected: t.len(),
                found: k0.nrows(),
            });
        }
        if k0.ncols() != r.len() {
            return Err(SamplingError::DimensionMismatch {
                what: "kernel columns",
                expected: r.len(),
                found: k0.ncols(),
            });
        }
        let dr = distance_increment(r.view())?;
        Ok(Self {
            forward,
            t,
            signal,
            r,
            k0,
            dr,
        })
    }

    pub fn nt(&self) -> usize {
        self.t.len()
    }

    pub fn nr(&self) -> usize {
        self.r.len()
    }

    pub fn time(&self) -> &Array1<f64> {
        &self.t
    }

    pub fn signal(&self) -> &Array1<f64> {
        &self.signal
    }

    pub fn distances(&self) -> &Array1<f64> {
        &self.r
    }

    pub fn kernel(&self) -> &Array2<f64> {
        &self.k0
    }

    pub fn dr(&self) -> f64 {
        self.dr
    }

    /// Full operator `K` for the given background rate, modulation depth and
    /// signal scale.
    pub fn operator(&self, rate: f64, lamb: f64, v0: f64) -> Result<Array2<f64>, SamplingError> {
        let background = self.forward.background(self.t.view(), rate);
        assemble_forward_operator(self.k0.view(), background.view(), lamb, v0, self.dr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn kernel_is_one_at_time_zero() {
        let t = array![0.0, 0.1];
        let r = array![2.0, 3.0, 4.0];
        let k = dipolar_kernel(t.view(), r.view()).unwrap();
        for j in 0..3 {
            assert_eq!(k[[0, j]], 1.0);
        }
    }

    #[test]
    fn kernel_matches_small_phase_expansion() {
        // ∫₀¹ (1 - 3x²)² dx = 4/5, so K ≈ 1 - 0.4 φ² + O(φ⁴)
        let r = array![5.0];
        let omega = 2.0 * PI * DIPOLAR_FREQUENCY_MHZ_NM3 / 125.0;
        let t = array![0.01 / omega];
        let k = dipolar_kernel(t.view(), r.view()).unwrap();
        let phase: f64 = 0.01;
        assert_abs_diff_eq!(k[[0, 0]], 1.0 - 0.4 * phase * phase, epsilon = 1e-9);
    }

    #[test]
    fn kernel_is_even_in_time_and_bounded() {
        let t = array![-1.5, 1.5, 4.0];
        let r = array![1.8, 3.5];
        let k = dipolar_kernel(t.view(), r.view()).unwrap();
        for j in 0..2 {
            assert_abs_diff_eq!(k[[0, j]], k[[1, j]], epsilon = 1e-14);
        }
        assert!(k.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn background_decays_symmetrically() {
        let t = array![-2.0, 0.0, 2.0];
        let b = exponential_background(t.view(), 0.5);
        assert_abs_diff_eq!(b[0], (-1.0_f64).exp());
        assert_eq!(b[1], 1.0);
        assert_abs_diff_eq!(b[2], b[0]);
    }

    #[test]
    fn roughness_operators_have_expected_stencils() {
        let l2 = regularization_operator(4, 2).unwrap();
        assert_eq!(l2, array![[1.0, -2.0, 1.0, 0.0], [0.0, 1.0, -2.0, 1.0]]);
        let l1 = regularization_operator(3, 1).unwrap();
        assert_eq!(l1.dim(), (2, 3));
        assert_eq!(regularization_operator(2, 0).unwrap(), Array2::<f64>::eye(2));
        assert!(regularization_operator(3, 3).is_err());
        assert!(regularization_operator(5, 4).is_err());
    }

    #[test]
    fn operator_combines_depth_background_and_scale() {
        let k0 = array![[1.0, 0.5], [0.2, 0.0]];
        let b = array![1.0, 0.5];
        let k = assemble_forward_operator(k0.view(), b.view(), 0.4, 2.0, 0.1).unwrap();
        // row 0: 0.2 * (0.6 + 0.4 k0), row 1 additionally halved
        assert_abs_diff_eq!(k[[0, 0]], 0.2, epsilon = 1e-15);
        assert_abs_diff_eq!(k[[0, 1]], 0.2 * 0.8, epsilon = 1e-15);
        assert_abs_diff_eq!(k[[1, 0]], 0.5 * 0.2 * 0.68, epsilon = 1e-15);
        assert_abs_diff_eq!(k[[1, 1]], 0.5 * 0.2 * 0.6, epsilon = 1e-15);
    }

    #[test]
    fn signal_model_rejects_mismatched_inputs() {
        let forward: Arc<dyn ForwardModel> = Arc::new(DipolarModel);
        let k0 = Array2::<f64>::zeros((3, 2));
        let err = SignalModel::with_kernel(
            forward.clone(),
            k0.clone(),
            array![0.0, 0.1, 0.2],
            array![1.0, 0.9],
            array![2.0, 2.1],
        );
        assert!(matches!(err, Err(SamplingError::DimensionMismatch { what: "signal length", .. })));
        let err = SignalModel::with_kernel(
            forward,
            k0,
            array![0.0, 0.1, 0.2],
            array![1.0, 0.9, 0.8],
            array![2.0, 2.1, 2.2],
        );
        assert!(matches!(err, Err(SamplingError::DimensionMismatch { what: "kernel columns", .. })));
    }
}
