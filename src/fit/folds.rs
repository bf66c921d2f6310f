//! Row partitions for validation: a seeded holdout split and k-fold CV.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{EngineError, Result};

/// Train/test row indices of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn shuffled(n: usize, seed: u64) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    idx
}

/// Shuffled k-fold partition; fold sizes differ by at most one.
pub fn k_fold(n: usize, k: usize, seed: u64) -> Result<Vec<Fold>> {
    if k < 2 {
        return Err(EngineError::InvalidGrid(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    if k > n {
        return Err(EngineError::InvalidGrid(format!("cannot split {n} samples into {k} folds")));
    }

    let order = shuffled(n, seed);
    let base = n / k;
    let extra = n % k;

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        let mut test = order[start..start + size].to_vec();
        let mut train: Vec<usize> =
            order[..start].iter().chain(&order[start + size..]).copied().collect();
        test.sort_unstable();
        train.sort_unstable();
        folds.push(Fold { train, test });
        start += size;
    }
    Ok(folds)
}

/// Hold out `fraction` of the rows (at least one).
///
/// Returns `None` when the remaining training rows would number fewer than `min_train`.
pub fn holdout(n: usize, fraction: f64, min_train: usize, seed: u64) -> Option<Fold> {
    if fraction <= 0.0 || n == 0 {
        return None;
    }
    let n_test = ((n as f64 * fraction).round() as usize).max(1);
    if n_test >= n || n - n_test < min_train.max(1) {
        return None;
    }
    let order = shuffled(n, seed);
    let mut test = order[..n_test].to_vec();
    let mut train = order[n_test..].to_vec();
    test.sort_unstable();
    train.sort_unstable();
    Some(Fold { train, test })
}
