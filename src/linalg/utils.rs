use crate::linalg::faer_ndarray::{
    FaerArrayView, FaerLinalgError, array2_to_mat_mut, factorize_symmetric_with_fallback,
};
use faer::Side;
use ndarray::{Array2, ArrayBase, Data, Ix2};

/// Induced 1-norm: the largest absolute column sum.
pub fn one_norm<S: Data<Elem = f64>>(matrix: &ArrayBase<S, Ix2>) -> f64 {
    matrix
        .columns()
        .into_iter()
        .map(|col| col.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Inverse of a symmetric matrix through an LLT factorization, falling back to
/// LDLT when the matrix is not numerically positive definite.
pub fn symmetric_inverse<S: Data<Elem = f64>>(
    matrix: &ArrayBase<S, Ix2>,
    label: &str,
) -> Result<Array2<f64>, FaerLinalgError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(FaerLinalgError::NotSquare { rows, cols });
    }
    let view = FaerArrayView::new(matrix);
    let factor = factorize_symmetric_with_fallback(view.as_ref(), Side::Lower)?;
    if !factor.is_llt() {
        log::debug!("{label}: LLT failed, inverted through LDLT");
    }

    let mut inv = Array2::<f64>::eye(rows);
    let mut inv_view = array2_to_mat_mut(&mut inv);
    factor.solve_in_place(inv_view.as_mut());

    if !inv.iter().all(|v| v.is_finite()) {
        log::warn!("{label}: inverse contains non-finite entries");
        return Err(FaerLinalgError::FactorizationFailed);
    }

    symmetrize_in_place(&mut inv);
    Ok(inv)
}

/// Numerical solves can leave tiny asymmetry; average the two triangles.
pub fn symmetrize_in_place(matrix: &mut Array2<f64>) {
    let n = matrix.nrows().min(matrix.ncols());
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
}
