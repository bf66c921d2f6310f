//! Small descriptive statistics used by the trainer and predictor.

use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// `values` is sorted in place. Returns `None` for an empty slice.
pub fn quantile_mut(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(quantile_sorted(values, q))
}

/// Same as [`quantile_mut`] for an already sorted, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = pos - lo as f64;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

/// Pinball (quantile) loss of a single prediction at level `alpha`.
pub fn pinball(y: f64, pred: f64, alpha: f64) -> f64 {
    let diff = y - pred;
    if diff >= 0.0 {
        alpha * diff
    } else {
        (alpha - 1.0) * diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile_mut(&mut v, 0.0), Some(1.0));
        assert_eq!(quantile_mut(&mut v, 1.0), Some(4.0));
        assert!((quantile_mut(&mut v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(quantile_mut(&mut [], 0.5), None);
    }

    #[test]
    fn pinball_penalizes_asymmetrically() {
        // Under-prediction at a high quantile costs more than over-prediction.
        assert!((pinball(10.0, 8.0, 0.9) - 1.8).abs() < 1e-12);
        assert!((pinball(8.0, 10.0, 0.9) - 0.2).abs() < 1e-12);
    }
}
