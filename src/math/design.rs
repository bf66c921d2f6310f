//! Design-matrix assembly.
//!
//! Training data is held as an `n × p` nalgebra matrix. nalgebra stores
//! matrices column-major, so each feature column is contiguous, which is the
//! access pattern of split search. Prediction walks rows, so callers that
//! predict repeatedly materialize row-major copies once via [`rows_of`].

use nalgebra::{DMatrix, DVector};

use crate::domain::TrainingSample;

/// Stack training samples into `(X, y)`.
pub fn design_matrix(samples: &[&TrainingSample]) -> (DMatrix<f64>, DVector<f64>) {
    let n = samples.len();
    let p = samples.first().map(|s| s.features.len()).unwrap_or(0);
    let x = DMatrix::from_fn(n, p, |i, j| samples[i].features.values()[j]);
    let y = DVector::from_iterator(n, samples.iter().map(|s| s.sale_price));
    (x, y)
}

/// Row-major copy of a matrix.
pub fn rows_of(x: &DMatrix<f64>) -> Vec<Vec<f64>> {
    x.row_iter().map(|r| r.iter().copied().collect()).collect()
}

/// Select a subset of rows, preserving the given order.
pub fn select_rows(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    idx: &[usize],
) -> (DMatrix<f64>, DVector<f64>) {
    let xs = x.select_rows(idx.iter());
    let ys = DVector::from_iterator(idx.len(), idx.iter().map(|&i| y[i]));
    (xs, ys)
}
