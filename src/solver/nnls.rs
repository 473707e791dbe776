//! Active-set nonnegative least squares on normal equations.
//!
//! Lawson-Hanson active-set method in the Bro-de Jong form that works directly
//! on `AᵀA` and `Aᵀb`, so repeated solves with the same design never touch `A`.

use crate::linalg::faer_ndarray::{
    FaerArrayView, FaerLinalgError, factorize_symmetric_with_fallback,
};
use crate::linalg::utils::one_norm;
use faer::Side;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NnlsError {
    #[error("Normal matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("Right-hand side has length {found}, expected {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Normal matrix entry ({row}, {col}) is not finite")]
    NonFiniteMatrix { row: usize, col: usize },
    #[error("Right-hand side entry {index} is not a finite real number: {value}")]
    NonFiniteRhs { index: usize, value: f64 },
    #[error("Restricted normal equations could not be solved: {0}")]
    RestrictedSolve(#[from] FaerLinalgError),
    #[error("Restricted solve over {passive} passive variables produced non-finite values")]
    NonFiniteCandidate { passive: usize },
    #[error("Tolerance must be finite and nonnegative, got {0}")]
    InvalidTolerance(f64),
}

fn default_stagnation_limit() -> usize {
    5
}

/// Tuning knobs; `None` selects the size-dependent default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NnlsOptions {
    /// Feasibility and optimality threshold.
    #[serde(default)]
    pub tolerance: Option<f64>,
    /// Inner-loop cap per outer iteration, `5n` by default.
    #[serde(default)]
    pub max_inner_iterations: Option<usize>,
    /// Outer-loop cap, `3n` by default.
    #[serde(default)]
    pub max_outer_iterations: Option<usize>,
    /// Consecutive unchanged outer iterations tolerated before giving up.
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: usize,
}

impl Default for NnlsOptions {
    fn default() -> Self {
        Self {
            tolerance: None,
            max_inner_iterations: None,
            max_outer_iterations: None,
            stagnation_limit: default_stagnation_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NnlsTermination {
    /// No remaining gradient component exceeds the tolerance.
    Converged,
    /// Every variable is passive.
    PassiveSetFull,
    /// The candidate stopped changing across outer iterations.
    Stagnated,
    /// The inner loop ran out of iterations; the result is the last feasible
    /// interpolate.
    InnerIterationLimit,
    /// The outer loop ran out of iterations; the result is the last accepted
    /// candidate.
    OuterIterationLimit,
}

#[derive(Debug, Clone)]
pub struct NnlsSolution {
    pub x: Array1<f64>,
    /// `Aᵀb - AᵀA x` at the returned `x`.
    pub gradient: Array1<f64>,
    pub tolerance: f64,
    pub termination: NnlsTermination,
    pub outer_iterations: usize,
}

/// Solves `min ‖Ax - b‖²` subject to `x ≥ 0` given `AᵀA` and `Aᵀb`.
pub fn fnnls<S1, S2>(ata: &ArrayBase<S1, Ix2>, atb: &ArrayBase<S2, Ix1>) -> Result<Array1<f64>, NnlsError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    Ok(fnnls_with_options(ata, atb, &NnlsOptions::default())?.x)
}

pub fn fnnls_with_options<S1, S2>(
    ata: &ArrayBase<S1, Ix2>,
    atb: &ArrayBase<S2, Ix1>,
    options: &NnlsOptions,
) -> Result<NnlsSolution, NnlsError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let (rows, cols) = ata.dim();
    if rows != cols {
        return Err(NnlsError::NotSquare { rows, cols });
    }
    let n = cols;
    if atb.len() != n {
        return Err(NnlsError::LengthMismatch {
            expected: n,
            found: atb.len(),
        });
    }
    if let Some(((row, col), _)) = ata.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(NnlsError::NonFiniteMatrix { row, col });
    }
    if let Some((index, &value)) = atb.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(NnlsError::NonFiniteRhs { index, value });
    }

    let tol = match options.tolerance {
        Some(tol) if !tol.is_finite() || tol < 0.0 => return Err(NnlsError::InvalidTolerance(tol)),
        Some(tol) => tol,
        None => 10.0 * f64::EPSILON * one_norm(ata) * rows.max(cols) as f64,
    };
    let max_inner = options.max_inner_iterations.unwrap_or(5 * n);
    let max_outer = options.max_outer_iterations.unwrap_or(3 * n);

    let mut x = Array1::<f64>::zeros(n);
    let mut passive = vec![false; n];
    let mut w = atb.to_owned();
    let mut outer_iterations = 0usize;
    let mut unchanged = 0usize;
    let mut termination = None;

    while passive.iter().any(|p| !p) && w.iter().any(|&wi| wi > tol) {
        if outer_iterations >= max_outer {
            termination = Some(NnlsTermination::OuterIterationLimit);
            break;
        }
        outer_iterations += 1;

        let t = argmax(&w);
        passive[t] = true;

        let mut candidate = solve_passive(ata, atb, &passive)?;

        let mut inner = 0usize;
        while infeasible(&candidate, &passive, tol) {
            if inner >= max_inner {
                termination = Some(NnlsTermination::InnerIterationLimit);
                break;
            }
            inner += 1;

            let mut alpha = f64::INFINITY;
            for i in 0..n {
                if passive[i] && candidate[i] <= tol {
                    let denom = x[i] - candidate[i];
                    let step = if denom > 0.0 { x[i] / denom } else { 0.0 };
                    alpha = alpha.min(step);
                }
            }
            let alpha = alpha.clamp(0.0, 1.0);
            for i in 0..n {
                x[i] += alpha * (candidate[i] - x[i]);
            }
            for i in 0..n {
                if passive[i] && x[i] <= tol {
                    passive[i] = false;
                    x[i] = 0.0;
                }
            }
            candidate = solve_passive(ata, atb, &passive)?;
        }
        if termination.is_some() {
            break;
        }

        if candidate.iter().zip(x.iter()).all(|(a, b)| a == b) {
            unchanged += 1;
        } else {
            unchanged = 0;
        }
        if unchanged > options.stagnation_limit {
            termination = Some(NnlsTermination::Stagnated);
            break;
        }
        x = candidate;

        w = atb.to_owned() - ata.dot(&x);
        for (wi, &p) in w.iter_mut().zip(passive.iter()) {
            if p {
                *wi = f64::NEG_INFINITY;
            }
        }
    }

    let termination = termination.unwrap_or(if passive.iter().all(|&p| p) {
        NnlsTermination::PassiveSetFull
    } else {
        NnlsTermination::Converged
    });
    match termination {
        NnlsTermination::InnerIterationLimit => log::warn!(
            "fnnls: inner loop hit {max_inner} iterations after {outer_iterations} outer iterations; returning last feasible point"
        ),
        NnlsTermination::OuterIterationLimit => log::warn!(
            "fnnls: outer loop hit {max_outer} iterations (n = {n}, tol = {tol:.3e}); returning last accepted point"
        ),
        other => log::debug!("fnnls: {other:?} after {outer_iterations} outer iterations (n = {n}, tol = {tol:.3e})"),
    }

    let gradient = atb.to_owned() - ata.dot(&x);
    Ok(NnlsSolution {
        x,
        gradient,
        tolerance: tol,
        termination,
        outer_iterations,
    })
}

/// First index of the largest entry.
fn argmax(w: &Array1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in w.iter().enumerate() {
        if v > w[best] {
            best = i;
        }
    }
    best
}

fn infeasible(candidate: &Array1<f64>, passive: &[bool], tol: f64) -> bool {
    candidate
        .iter()
        .zip(passive.iter())
        .any(|(&c, &p)| p && c <= tol)
}

/// Unconstrained solution over the passive set, zero elsewhere.
fn solve_passive<S1, S2>(
    ata: &ArrayBase<S1, Ix2>,
    atb: &ArrayBase<S2, Ix1>,
    passive: &[bool],
) -> Result<Array1<f64>, NnlsError>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let idx: Vec<usize> = passive
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| p.then_some(i))
        .collect();
    let mut out = Array1::<f64>::zeros(passive.len());
    match idx.len() {
        0 => return Ok(out),
        1 => {
            let i = idx[0];
            out[i] = atb[i] / ata[[i, i]];
        }
        k => {
            let sub = Array2::from_shape_fn((k, k), |(a, b)| ata[[idx[a], idx[b]]]);
            let rhs = Array1::from_shape_fn(k, |a| atb[idx[a]]);
            let view = FaerArrayView::new(&sub);
            let factor = factorize_symmetric_with_fallback(view.as_ref(), Side::Lower)?;
            let sol = factor.solve_vec(&rhs);
            for (a, &i) in idx.iter().enumerate() {
                out[i] = sol[a];
            }
        }
    }
    if out.iter().any(|v| !v.is_finite()) {
        return Err(NnlsError::NonFiniteCandidate { passive: idx.len() });
    }
    Ok(out)
}
