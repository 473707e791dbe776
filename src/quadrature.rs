//! Gauss-Legendre quadrature for the orientation average in the dipolar kernel.
//!
//! Nodes and weights come from the Golub-Welsch algorithm: the nodes are the
//! eigenvalues of the symmetric tridiagonal Jacobi matrix of the Legendre
//! recurrence, and each weight is `2 · q₀ᵢ²` where `q₀ᵢ` is the first component
//! of the matching normalized eigenvector.

use crate::linalg::faer_ndarray::{FaerEigh, FaerLinalgError};
use faer::Side;
use ndarray::{Array1, Array2};
use std::sync::OnceLock;

/// Points per panel of the composite rule used by the kernel.
pub const PANEL_POINTS: usize = 16;

/// Gauss-Legendre rule on `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct GaussLegendreRule {
    nodes: Array1<f64>,
    weights: Array1<f64>,
}

impl GaussLegendreRule {
    pub fn new(n: usize) -> Result<Self, FaerLinalgError> {
        if n == 0 {
            return Ok(Self {
                nodes: Array1::zeros(0),
                weights: Array1::zeros(0),
            });
        }
        // Legendre recurrence: diagonal 0, off-diagonal k / sqrt(4k² - 1)
        let mut jacobi = Array2::<f64>::zeros((n, n));
        for k in 1..n {
            let kf = k as f64;
            let beta = kf / (4.0 * kf * kf - 1.0).sqrt();
            jacobi[[k - 1, k]] = beta;
            jacobi[[k, k - 1]] = beta;
        }
        let (values, vectors) = jacobi.eigh(Side::Lower)?;
        let weights = Array1::from_shape_fn(n, |i| 2.0 * vectors[[0, i]] * vectors[[0, i]]);
        Ok(Self {
            nodes: values,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &Array1<f64> {
        &self.nodes
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Integrates `f` over `[a, b]`.
    pub fn integrate(&self, a: f64, b: f64, f: impl Fn(f64) -> f64) -> f64 {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (b + a);
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .map(|(&x, &w)| w * f(mid + half * x))
            .sum::<f64>()
            * half
    }

    /// Integrates `f` over `[a, b]` split into `panels` equal sub-intervals.
    pub fn integrate_composite(
        &self,
        a: f64,
        b: f64,
        panels: usize,
        f: impl Fn(f64) -> f64,
    ) -> f64 {
        let panels = panels.max(1);
        let width = (b - a) / panels as f64;
        (0..panels)
            .map(|p| {
                let lo = a + width * p as f64;
                self.integrate(lo, lo + width, &f)
            })
            .sum()
    }
}

/// Shared rule used by the kernel; computed once per process.
pub fn panel_rule() -> Result<&'static GaussLegendreRule, FaerLinalgError> {
    static RULE: OnceLock<GaussLegendreRule> = OnceLock::new();
    if let Some(rule) = RULE.get() {
        return Ok(rule);
    }
    let rule = GaussLegendreRule::new(PANEL_POINTS)?;
    Ok(RULE.get_or_init(|| rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weights_sum_to_interval_length() {
        let rule = GaussLegendreRule::new(7).unwrap();
        assert_abs_diff_eq!(rule.weights().sum(), 2.0, epsilon = 1e-13);
        for w in rule.nodes().windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn three_point_rule_matches_closed_form() {
        let rule = GaussLegendreRule::new(3).unwrap();
        let node = (3.0_f64 / 5.0).sqrt();
        assert_abs_diff_eq!(rule.nodes()[0], -node, epsilon = 1e-13);
        assert_abs_diff_eq!(rule.nodes()[1], 0.0, epsilon = 1e-13);
        assert_abs_diff_eq!(rule.nodes()[2], node, epsilon = 1e-13);
        assert_abs_diff_eq!(rule.weights()[0], 5.0 / 9.0, epsilon = 1e-13);
        assert_abs_diff_eq!(rule.weights()[1], 8.0 / 9.0, epsilon = 1e-13);
    }

    #[test]
    fn exact_for_polynomials_up_to_degree_2n_minus_1() {
        let rule = GaussLegendreRule::new(5).unwrap();
        // ∫₀¹ x⁹ dx = 1/10
        assert_abs_diff_eq!(rule.integrate(0.0, 1.0, |x| x.powi(9)), 0.1, epsilon = 1e-13);
    }

    #[test]
    fn composite_rule_integrates_oscillatory_functions() {
        let rule = panel_rule().unwrap();
        let omega: f64 = 40.0;
        let exact = omega.sin() / omega;
        let approx = rule.integrate_composite(0.0, 1.0, 10, |x| (omega * x).cos());
        assert_abs_diff_eq!(approx, exact, epsilon = 1e-12);
    }
}
