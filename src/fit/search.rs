//! Cross-validated hyperparameter search.
//!
//! Each candidate is scored by the mean held-out MSE of a squared-error model
//! over the same k folds. Candidates are evaluated in parallel; selection is
//! deterministic:
//! 1. lowest mean MSE
//! 2. on a tie, fewer estimators
//! 3. then the lower grid index

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;

use crate::domain::Hyperparameters;
use crate::error::{EngineError, Result};
use crate::fit::cancel::CancelToken;
use crate::fit::folds::Fold;
use crate::math::select_rows;
use crate::models::{Booster, GradientBoostedTrees, Objective};

/// Relative difference below which two CV scores count as tied.
const SCORE_TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    /// Position in the expanded grid.
    pub index: usize,
    pub hyperparameters: Hyperparameters,
    pub mean_mse: f64,
    pub fold_mse: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: Hyperparameters,
    pub best_index: usize,
    pub best_score: f64,
    pub folds: usize,
    /// Every candidate in grid order.
    pub candidates: Vec<CandidateScore>,
}

impl SearchOutcome {
    /// Candidates sorted best first.
    pub fn ranked(&self) -> Vec<&CandidateScore> {
        let mut out: Vec<&CandidateScore> = self.candidates.iter().collect();
        out.sort_by(|a, b| {
            a.mean_mse
                .total_cmp(&b.mean_mse)
                .then(a.hyperparameters.n_estimators.cmp(&b.hyperparameters.n_estimators))
                .then(a.index.cmp(&b.index))
        });
        out
    }
}

/// Score every candidate on `folds` and pick the winner.
pub fn cross_validate(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    candidates: &[Hyperparameters],
    folds: &[Fold],
    cancel: &CancelToken,
) -> Result<SearchOutcome> {
    if candidates.is_empty() {
        return Err(EngineError::InvalidGrid("no candidates to evaluate".to_string()));
    }
    if folds.is_empty() {
        return Err(EngineError::InvalidGrid("no folds to evaluate on".to_string()));
    }

    // Evaluate each candidate independently (parallel).
    let scores: Vec<CandidateScore> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, hp)| score_candidate(x, y, index, hp, folds, cancel))
        .collect::<Result<Vec<_>>>()?;

    let best = select_best(&scores);
    let (best_index, best_score) = (best.index, best.mean_mse);
    let best_hp = best.hyperparameters.clone();
    tracing::info!(
        candidates = scores.len(),
        folds = folds.len(),
        best_index,
        best_rmse = best_score.sqrt(),
        "hyperparameter search finished"
    );

    Ok(SearchOutcome {
        best: best_hp,
        best_index,
        best_score,
        folds: folds.len(),
        candidates: scores,
    })
}

fn score_candidate(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    index: usize,
    hp: &Hyperparameters,
    folds: &[Fold],
    cancel: &CancelToken,
) -> Result<CandidateScore> {
    let mut fold_mse = Vec::with_capacity(folds.len());
    for fold in folds {
        cancel.check()?;
        let (x_train, y_train) = select_rows(x, y, &fold.train);
        let (x_test, y_test) = select_rows(x, y, &fold.test);
        let model =
            GradientBoostedTrees::fit(&x_train, &y_train, Objective::SquaredError, hp, None)?;
        let pred = model.predict_matrix(&x_test);
        let mse = pred
            .iter()
            .zip(y_test.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f64>()
            / pred.len().max(1) as f64;
        fold_mse.push(mse);
    }
    let mean_mse = fold_mse.iter().sum::<f64>() / fold_mse.len() as f64;
    tracing::debug!(
        index,
        mean_mse,
        max_depth = hp.max_depth,
        n_estimators = hp.n_estimators,
        "candidate scored"
    );
    Ok(CandidateScore {
        index,
        hyperparameters: hp.clone(),
        mean_mse,
        fold_mse,
    })
}

fn tied(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCORE_TIE_TOLERANCE * a.abs().max(b.abs())
}

/// Lowest score, preferring the simpler candidate on a tie. `scores` must be non-empty.
pub fn select_best(scores: &[CandidateScore]) -> &CandidateScore {
    let mut best = &scores[0];
    for s in &scores[1..] {
        let better = if tied(s.mean_mse, best.mean_mse) {
            s.hyperparameters.n_estimators < best.hyperparameters.n_estimators
        } else {
            s.mean_mse < best.mean_mse
        };
        if better {
            best = s;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::folds::k_fold;

    fn score(index: usize, mse: f64, n_estimators: usize) -> CandidateScore {
        CandidateScore {
            index,
            hyperparameters: Hyperparameters {
                n_estimators,
                ..Hyperparameters::default()
            },
            mean_mse: mse,
            fold_mse: vec![mse],
        }
    }

    #[test]
    fn lowest_score_wins() {
        let scores = vec![score(0, 5.0, 100), score(1, 3.0, 300), score(2, 4.0, 10)];
        assert_eq!(select_best(&scores).index, 1);
    }

    #[test]
    fn ties_prefer_fewer_estimators_then_lower_index() {
        let scores = vec![score(0, 2.0, 300), score(1, 2.0, 100), score(2, 2.0, 100)];
        assert_eq!(select_best(&scores).index, 1);
    }

    #[test]
    fn cv_on_constant_target_prefers_the_smaller_model() {
        // Every candidate predicts a constant target exactly, so all scores tie.
        let x = DMatrix::from_fn(20, 2, |i, j| (i * (j + 1)) as f64);
        let y = DVector::from_element(20, 250_000.0);
        let base = Hyperparameters::default();
        let candidates = vec![
            Hyperparameters {
                n_estimators: 20,
                ..base.clone()
            },
            Hyperparameters {
                n_estimators: 5,
                ..base.clone()
            },
        ];
        let folds = k_fold(20, 4, 42).unwrap();
        let outcome = cross_validate(&x, &y, &candidates, &folds, &CancelToken::new()).unwrap();
        assert_eq!(outcome.best_index, 1);
        assert_eq!(outcome.best.n_estimators, 5);
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.ranked()[0].index, 1);
    }

    #[test]
    fn cancelled_search_stops() {
        let x = DMatrix::from_fn(10, 1, |i, _| i as f64);
        let y = DVector::from_fn(10, |i, _| i as f64);
        let token = CancelToken::new();
        token.cancel();
        let folds = k_fold(10, 2, 1).unwrap();
        let res = cross_validate(&x, &y, &[Hyperparameters::default()], &folds, &token);
        assert!(matches!(res, Err(EngineError::Cancelled)));
    }
}
