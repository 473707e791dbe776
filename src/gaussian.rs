//! Correlated Gaussian perturbations for the constrained conditional draw.
//!
//! For a precision matrix `Q = tau·KᵀK + delta·LᵀL` the covariance
//! `Σ = Q⁻¹` is factored as `Σ = C Cᵀ`. A standard normal `v` mapped through
//! `w = C⁻ᵀ v` has covariance `(C Cᵀ)⁻¹ = Q`, which is the perturbation the
//! Bardsley-Fox projection needs on the right-hand side of the normal
//! equations.

use crate::linalg::faer_ndarray::{FaerCholesky, FaerEigh, FaerLinalgError};
use crate::linalg::utils::symmetric_inverse;
use faer::Side;
use ndarray::{Array1, Array2, Axis};
use rand_distr::{Distribution, StandardNormal};

/// Factor `C` of a covariance matrix with `C Cᵀ = Σ`.
#[derive(Debug, Clone)]
pub enum CovarianceFactor {
    /// Lower-triangular Cholesky factor.
    Cholesky(Array2<f64>),
    /// Symmetric square root `Σ^{1/2} = U diag(√λ) Uᵀ`, kept in eigen form.
    SymmetricRoot {
        roots: Array1<f64>,
        vectors: Array2<f64>,
    },
}

impl CovarianceFactor {
    /// Lower Cholesky factor of `covariance`, or its symmetric square root when
    /// the covariance is not numerically positive definite.
    pub fn from_covariance(covariance: &Array2<f64>) -> Result<Self, FaerLinalgError> {
        let (rows, cols) = covariance.dim();
        if rows != cols {
            return Err(FaerLinalgError::NotSquare { rows, cols });
        }
        match covariance.cholesky(Side::Lower) {
            Ok(factor) => Ok(CovarianceFactor::Cholesky(factor.lower_triangular())),
            Err(err) => {
                log::debug!("covariance Cholesky failed ({err}); using symmetric square root");
                let (values, vectors) = covariance.eigh(Side::Lower)?;
                // negative eigenvalues here are round-off
                let roots = values.mapv(|v| v.max(0.0).sqrt());
                Ok(CovarianceFactor::SymmetricRoot { roots, vectors })
            }
        }
    }

    /// Factor of `precision⁻¹`.
    pub fn from_precision(precision: &Array2<f64>) -> Result<Self, FaerLinalgError> {
        let covariance = symmetric_inverse(precision, "posterior precision")?;
        Self::from_covariance(&covariance)
    }

    pub fn dim(&self) -> usize {
        match self {
            CovarianceFactor::Cholesky(c) => c.nrows(),
            CovarianceFactor::SymmetricRoot { roots, .. } => roots.len(),
        }
    }

    pub fn is_cholesky(&self) -> bool {
        matches!(self, CovarianceFactor::Cholesky(_))
    }

    /// Dense `C`.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            CovarianceFactor::Cholesky(c) => c.clone(),
            CovarianceFactor::SymmetricRoot { roots, vectors } => {
                let scaled = vectors * &roots.view().insert_axis(Axis(0));
                scaled.dot(&vectors.t())
            }
        }
    }

    /// Least-squares solution of `Cᵀ w = v`.
    ///
    /// The symmetric root is inverted through its pseudo-inverse, dropping
    /// roots below `max(√λ) · n · ε`.
    pub fn solve_transpose(&self, v: &Array1<f64>) -> Array1<f64> {
        match self {
            CovarianceFactor::Cholesky(c) => back_solve_upper_from_lower(c, v),
            CovarianceFactor::SymmetricRoot { roots, vectors } => {
                let n = roots.len();
                let largest = roots.iter().copied().fold(0.0, f64::max);
                let cutoff = largest * n as f64 * f64::EPSILON;
                let mut projected = vectors.t().dot(v);
                for (p, &s) in projected.iter_mut().zip(roots.iter()) {
                    *p = if s > cutoff { *p / s } else { 0.0 };
                }
                vectors.dot(&projected)
            }
        }
    }
}

/// Solves `Lᵀ x = rhs` for lower-triangular `L`.
fn back_solve_upper_from_lower(l: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let p = rhs.len();
    debug_assert_eq!(l.nrows(), p);
    let mut out = Array1::<f64>::zeros(p);
    for i in (0..p).rev() {
        let mut v = rhs[i];
        for j in (i + 1)..p {
            v -= l[[j, i]] * out[j];
        }
        let d = l[[i, i]];
        out[i] = if d.abs() > 1e-300 { v / d } else { 0.0 };
    }
    out
}

/// Draws `w ~ N(0, Q)` for the precision `Q` whose inverse `factor` factors.
pub fn draw_perturbation<R: rand::Rng + ?Sized>(
    factor: &CovarianceFactor,
    rng: &mut R,
) -> Array1<f64> {
    let v: Array1<f64> = Array1::from_shape_fn(factor.dim(), |_| StandardNormal.sample(&mut *rng));
    factor.solve_transpose(&v)
}
