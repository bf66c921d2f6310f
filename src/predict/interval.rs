//! Interval estimators and ordering repair.

use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};

use crate::math::quantile_mut;

/// Enforce `low <= point <= high`: swap crossed bounds, then widen to the point.
///
/// Returns the repaired bounds and whether anything changed.
pub fn repair_ordering(point: f64, low: f64, high: f64) -> (f64, f64, bool) {
    let (mut lo, mut hi) = if low > high { (high, low) } else { (low, high) };
    let mut repaired = low > high;
    if lo > point {
        lo = point;
        repaired = true;
    }
    if hi < point {
        hi = point;
        repaired = true;
    }
    (lo, hi, repaired)
}

/// Whether an interval is too narrow to carry any uncertainty.
pub fn is_degenerate(point: f64, low: f64, high: f64) -> bool {
    high - low <= 1e-9 * point.abs().max(1.0)
}

/// Residual bootstrap: `draws` residuals resampled with replacement and added
/// to the point, summarized by the empirical `levels` quantiles.
///
/// `None` when there are no residuals to resample.
pub fn bootstrap_interval<R: Rng + ?Sized>(
    rng: &mut R,
    point: f64,
    residuals: &[f64],
    draws: usize,
    levels: (f64, f64),
) -> Option<(f64, f64)> {
    if residuals.is_empty() || draws == 0 {
        return None;
    }
    let mut samples: Vec<f64> = (0..draws)
        .filter_map(|_| residuals.choose(rng).map(|r| point + r))
        .collect();
    let low = quantile_mut(&mut samples, levels.0)?;
    let high = quantile_mut(&mut samples, levels.1)?;
    Some((low, high))
}

/// Normal draws around the point with standard deviation `relative_error · |point|`.
///
/// A point of exactly zero uses a standard deviation of one currency unit.
pub fn parametric_interval<R: Rng + ?Sized>(
    rng: &mut R,
    point: f64,
    relative_error: f64,
    draws: usize,
    levels: (f64, f64),
) -> (f64, f64) {
    let sd = if point == 0.0 { 1.0 } else { relative_error * point.abs() };
    let Ok(normal) = Normal::new(0.0, sd) else {
        return (point, point);
    };
    let mut samples: Vec<f64> = (0..draws.max(2)).map(|_| point + normal.sample(rng)).collect();
    let low = quantile_mut(&mut samples, levels.0).unwrap_or(point);
    let high = quantile_mut(&mut samples, levels.1).unwrap_or(point);
    (low, high)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn repair_swaps_and_widens() {
        assert_eq!(repair_ordering(100.0, 90.0, 110.0), (90.0, 110.0, false));
        assert_eq!(repair_ordering(100.0, 110.0, 90.0), (90.0, 110.0, true));
        assert_eq!(repair_ordering(100.0, 105.0, 120.0), (100.0, 120.0, true));
        assert_eq!(repair_ordering(100.0, 80.0, 95.0), (80.0, 100.0, true));
    }

    #[test]
    fn bootstrap_brackets_the_residual_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        let residuals: Vec<f64> = (-50..=50).map(f64::from).collect();
        let (lo, hi) =
            bootstrap_interval(&mut rng, 1_000.0, &residuals, 1_000, (0.05, 0.95)).unwrap();
        assert!(lo < 1_000.0 && hi > 1_000.0);
        assert!(lo >= 950.0 && hi <= 1_050.0);
        assert!(bootstrap_interval(&mut rng, 1_000.0, &[], 1_000, (0.05, 0.95)).is_none());
    }

    #[test]
    fn parametric_scales_with_the_point() {
        let mut rng = StdRng::seed_from_u64(2);
        let (lo, hi) = parametric_interval(&mut rng, 200_000.0, 0.1, 1_000, (0.05, 0.95));
        // Roughly ±1.645 · 20k.
        assert!(lo > 150_000.0 && lo < 190_000.0, "{lo}");
        assert!(hi > 210_000.0 && hi < 250_000.0, "{hi}");

        let (lo, hi) = parametric_interval(&mut rng, 0.0, 0.1, 1_000, (0.05, 0.95));
        assert!(lo < 0.0 && hi > 0.0);
        assert!(!is_degenerate(0.0, lo, hi));
    }

    #[test]
    fn degenerate_detection() {
        assert!(is_degenerate(100.0, 100.0, 100.0));
        assert!(!is_degenerate(100.0, 99.0, 101.0));
    }
}
