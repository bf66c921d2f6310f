//! Gradient-boosted regression trees.
//!
//! The engine only talks to boosted models through the [`Booster`] trait, so
//! any conformant implementation can replace [`GradientBoostedTrees`].
//!
//! Fitting follows the classic gradient-boosting recipe:
//! - start from a constant (mean for squared error, α-quantile for pinball loss)
//! - each round, grow a least-squares tree on the negative gradient
//! - re-estimate every leaf with the objective's own line search and shrink
//!   it by the learning rate
//!
//! Row and column subsampling use a seeded `StdRng`, so a fit is fully
//! reproducible from its hyperparameters.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use crate::domain::Hyperparameters;
use crate::error::{EngineError, Result};
use crate::math::{mean, pinball, quantile_mut, rows_of};
use crate::models::shap::tree_shap;
use crate::models::tree::{RegressionTree, TreeBuilder};

/// Loss minimized by a booster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "loss", rename_all = "snake_case")]
pub enum Objective {
    SquaredError,
    /// Pinball loss at level `alpha`.
    Quantile { alpha: f64 },
}

impl Objective {
    pub fn loss(self, y: f64, f: f64) -> f64 {
        match self {
            Objective::SquaredError => (y - f) * (y - f),
            Objective::Quantile { alpha } => pinball(y, f, alpha),
        }
    }

    pub fn negative_gradient(self, y: f64, f: f64) -> f64 {
        match self {
            Objective::SquaredError => y - f,
            Objective::Quantile { alpha } => {
                if y > f {
                    alpha
                } else {
                    alpha - 1.0
                }
            }
        }
    }

    fn initial_score(self, y: &[f64]) -> f64 {
        match self {
            Objective::SquaredError => mean(y).unwrap_or(0.0),
            Objective::Quantile { alpha } => quantile_mut(&mut y.to_vec(), alpha).unwrap_or(0.0),
        }
    }

    /// Optimal constant update for the residuals `y - f` that fell into a leaf.
    fn leaf_value(self, residuals: &mut [f64]) -> f64 {
        match self {
            Objective::SquaredError => mean(residuals).unwrap_or(0.0),
            Objective::Quantile { alpha } => quantile_mut(residuals, alpha).unwrap_or(0.0),
        }
    }
}

/// Held-out rows used for early stopping.
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    pub x: &'a DMatrix<f64>,
    pub y: &'a DVector<f64>,
}

/// The narrow capability the engine needs from a boosted-tree library.
pub trait Booster: Sized + Send + Sync {
    fn fit(
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        objective: Objective,
        params: &Hyperparameters,
        validation: Option<Validation<'_>>,
    ) -> Result<Self>;

    fn predict_row(&self, row: &[f64]) -> f64;

    fn predict_matrix(&self, x: &DMatrix<f64>) -> Vec<f64> {
        rows_of(x).iter().map(|r| self.predict_row(r)).collect()
    }

    fn to_bytes(&self) -> Result<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub objective: Objective,
    pub base_score: f64,
    pub n_features: usize,
    trees: Vec<RegressionTree>,
    /// Rounds kept when early stopping was enabled.
    pub best_iteration: Option<usize>,
}

impl GradientBoostedTrees {
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean model output over the rows the node covers were counted on.
    pub fn expected_value(&self) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.expected_value()).sum::<f64>()
    }

    /// Per-feature additive attributions for one row.
    ///
    /// `expected_value() + Σ contributions == predict_row(row)`.
    pub fn contributions(&self, row: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree_shap(tree, row, &mut phi);
        }
        phi
    }

    /// Recount node covers on `rows`; attributions are taken relative to this population.
    pub fn recount_covers(&mut self, rows: &[Vec<f64>]) {
        for tree in &mut self.trees {
            tree.recount_covers(rows);
        }
    }
}

fn sampled_indices(rng: &mut StdRng, total: usize, fraction: f64) -> Vec<usize> {
    let k = ((total as f64 * fraction).round() as usize).clamp(1, total);
    if k == total {
        return (0..total).collect();
    }
    let mut idx = sample(rng, total, k).into_vec();
    idx.sort_unstable();
    idx
}

impl Booster for GradientBoostedTrees {
    fn fit(
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        objective: Objective,
        params: &Hyperparameters,
        validation: Option<Validation<'_>>,
    ) -> Result<Self> {
        params.validate().map_err(EngineError::InvalidHyperparameters)?;
        if let Objective::Quantile { alpha } = objective {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(EngineError::InvalidHyperparameters(format!(
                    "quantile level must lie in (0, 1), got {alpha}"
                )));
            }
        }

        let n = x.nrows();
        let p = x.ncols();
        if n == 0 || p == 0 || y.len() != n {
            return Err(EngineError::InvalidTrainingData(format!(
                "cannot fit a booster on a {n}x{p} design with {} targets",
                y.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let builder = TreeBuilder {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            min_split_gain: params.min_split_gain,
        };

        let y = y.as_slice();
        let base_score = objective.initial_score(y);
        let rows = rows_of(x);
        let mut f = vec![base_score; n];

        let val_rows = validation.map(|v| rows_of(v.x));
        let mut val_f = val_rows.as_ref().map(|r| vec![base_score; r.len()]);
        let mut best: Option<(usize, f64)> = None;
        let mut stopped_early = false;

        let mut trees: Vec<RegressionTree> = Vec::with_capacity(params.n_estimators);
        let mut targets = vec![0.0; n];

        for round in 0..params.n_estimators {
            for i in 0..n {
                targets[i] = objective.negative_gradient(y[i], f[i]);
            }
            let row_idx = sampled_indices(&mut rng, n, params.subsample);
            let col_idx = sampled_indices(&mut rng, p, params.colsample);

            let grown = builder.grow(x, &targets, row_idx, &col_idx);
            let mut tree = grown.tree;
            for (leaf, leaf_rows) in grown.leaves {
                let mut residuals: Vec<f64> = leaf_rows.iter().map(|&r| y[r] - f[r]).collect();
                let value = objective.leaf_value(&mut residuals) * params.learning_rate;
                tree.set_leaf_value(leaf, value);
            }

            for (fi, row) in f.iter_mut().zip(&rows) {
                *fi += tree.predict(row);
            }
            trees.push(tree);

            if let (Some(v), Some(vr), Some(vf)) = (validation, val_rows.as_ref(), val_f.as_mut()) {
                let last = &trees[trees.len() - 1];
                for (fi, row) in vf.iter_mut().zip(vr) {
                    *fi += last.predict(row);
                }
                let loss = vf
                    .iter()
                    .zip(v.y.iter())
                    .map(|(&fi, &yi)| objective.loss(yi, fi))
                    .sum::<f64>()
                    / vf.len().max(1) as f64;

                if best.is_none_or(|(_, b)| loss < b) {
                    best = Some((round, loss));
                }
                let patience = params.early_stopping_rounds;
                if let (Some(patience), Some((best_round, _))) = (patience, best) {
                    if round - best_round >= patience {
                        stopped_early = true;
                        break;
                    }
                }
            }
        }

        let best_iteration = match best {
            Some((best_round, _)) if params.early_stopping_rounds.is_some() => {
                trees.truncate(best_round + 1);
                Some(best_round + 1)
            }
            _ => None,
        };
        if stopped_early {
            tracing::debug!(kept = trees.len(), "early stopping");
        }

        let mut model = GradientBoostedTrees {
            objective,
            base_score,
            n_features: p,
            trees,
            best_iteration,
        };
        model.recount_covers(&rows);
        Ok(model)
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit(x: &DMatrix<f64>, y: &DVector<f64>, objective: Objective) -> GradientBoostedTrees {
        GradientBoostedTrees::fit(x, y, objective, &params(), None).unwrap()
    }

    fn linear_data(n: usize) -> (DMatrix<f64>, DVector<f64>) {
        let x = DMatrix::from_fn(n, 2, |i, j| {
            if j == 0 { i as f64 } else { ((i * 7) % 5) as f64 }
        });
        let y = DVector::from_fn(n, |i, _| 100.0 + 10.0 * i as f64 + 3.0 * ((i * 7) % 5) as f64);
        (x, y)
    }

    fn params() -> Hyperparameters {
        Hyperparameters {
            max_depth: 3,
            n_estimators: 50,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn squared_error_fit_tracks_the_target() {
        let (x, y) = linear_data(80);
        let model = fit(&x, &y, Objective::SquaredError);
        let pred = model.predict_matrix(&x);
        let sse: f64 = pred.iter().zip(y.iter()).map(|(p, t)| (p - t) * (p - t)).sum();
        let rmse = (sse / 80.0).sqrt();
        assert!(rmse < 20.0, "rmse {rmse}");
        assert_eq!(model.n_trees(), 50);
    }

    #[test]
    fn fit_is_reproducible() {
        let (x, y) = linear_data(40);
        let a = fit(&x, &y, Objective::SquaredError);
        let b = fit(&x, &y, Objective::SquaredError);
        assert_eq!(a, b);
    }

    #[test]
    fn quantile_levels_are_ordered_on_average() {
        let (x, y) = linear_data(100);
        let lo = fit(&x, &y, Objective::Quantile { alpha: 0.1 });
        let hi = fit(&x, &y, Objective::Quantile { alpha: 0.9 });
        let lo_mean = lo.predict_matrix(&x).iter().sum::<f64>();
        let hi_mean = hi.predict_matrix(&x).iter().sum::<f64>();
        assert!(lo_mean <= hi_mean);
    }

    #[test]
    fn expected_value_is_mean_training_prediction() {
        let (x, y) = linear_data(60);
        let model = fit(&x, &y, Objective::SquaredError);
        let pred = model.predict_matrix(&x);
        let mean_pred = pred.iter().sum::<f64>() / pred.len() as f64;
        assert!((model.expected_value() - mean_pred).abs() < 1e-6);
    }

    #[test]
    fn contributions_sum_to_prediction() {
        let (x, y) = linear_data(60);
        let model = fit(&x, &y, Objective::SquaredError);
        for row in rows_of(&x).iter().step_by(7) {
            let phi = model.contributions(row);
            let total = model.expected_value() + phi.iter().sum::<f64>();
            assert!((total - model.predict_row(row)).abs() < 1e-6);
        }
    }

    #[test]
    fn early_stopping_truncates() {
        let (x, y) = linear_data(60);
        // A flat validation target: every round that fits the slope makes it worse.
        let (vx, _) = linear_data(20);
        let vy = DVector::from_element(20, 400.0);
        let hp = Hyperparameters {
            n_estimators: 400,
            learning_rate: 0.5,
            early_stopping_rounds: Some(5),
            ..params()
        };
        let v = Validation { x: &vx, y: &vy };
        let model =
            GradientBoostedTrees::fit(&x, &y, Objective::SquaredError, &hp, Some(v)).unwrap();
        let kept = model.best_iteration.unwrap();
        assert_eq!(kept, model.n_trees());
        assert!(kept < 400);
    }

    #[test]
    fn serialization_round_trips() {
        let (x, y) = linear_data(30);
        let model = fit(&x, &y, Objective::Quantile { alpha: 0.05 });
        let back = GradientBoostedTrees::from_bytes(&model.to_bytes().unwrap()).unwrap();
        assert_eq!(model, back);
    }

    #[test]
    fn rejects_bad_inputs() {
        let (x, y) = linear_data(10);
        let bad = Hyperparameters {
            learning_rate: 0.0,
            ..params()
        };
        assert!(matches!(
            GradientBoostedTrees::fit(&x, &y, Objective::SquaredError, &bad, None),
            Err(EngineError::InvalidHyperparameters(_))
        ));
        assert!(matches!(
            GradientBoostedTrees::fit(&x, &y, Objective::Quantile { alpha: 1.0 }, &params(), None),
            Err(EngineError::InvalidHyperparameters(_))
        ));
        let empty = DMatrix::<f64>::zeros(0, 2);
        let none = DVector::<f64>::zeros(0);
        assert!(matches!(
            GradientBoostedTrees::fit(&empty, &none, Objective::SquaredError, &params(), None),
            Err(EngineError::InvalidTrainingData(_))
        ));
    }
}
