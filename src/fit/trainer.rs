//! Triplet training.
//!
//! Responsibilities:
//!
//! - validate the training set against the property type's schema
//! - hold out a seeded validation split when early stopping is enabled
//! - fit the point and quantile models (one rayon job per role)
//! - attach what inference needs: baseline, residuals, importance, metrics
//!
//! The trainer has no side effects beyond logging; persisting the result is
//! the caller's job.

use std::time::Instant;

use chrono::Utc;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{
    FeatureSchema, Hyperparameters, ModelRole, PropertyType, TailSplit, TrainingSample,
};
use crate::error::{EngineError, Result};
use crate::fit::cancel::CancelToken;
use crate::fit::folds::{Fold, holdout, k_fold};
use crate::fit::grid::HyperparameterGrid;
use crate::fit::search::{SearchOutcome, cross_validate};
use crate::math::{RegressionMetrics, design_matrix, rows_of, select_rows};
use crate::models::{
    Booster, EnsembleModel, GradientBoostedTrees, ModelMetrics, ModelTriplet, Objective, Validation,
};

/// Engine-wide training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub min_training_samples: usize,
    /// Folds used by hyperparameter search.
    pub cv_folds: usize,
    /// Confidence level the quantile models are fitted for.
    pub confidence_level: f64,
    pub tail_split: TailSplit,
    /// Compute mean |attribution| per feature after training.
    pub retain_importance: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_training_samples: 50,
            cv_folds: 5,
            confidence_level: 0.90,
            tail_split: TailSplit::default(),
            retain_importance: true,
        }
    }
}

/// Per-role outcome of a training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleReport {
    pub role: ModelRole,
    pub objective: Objective,
    pub trees: usize,
    pub best_iteration: Option<usize>,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub property_type: PropertyType,
    pub samples: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub hyperparameters: Hyperparameters,
    pub confidence_level: f64,
    pub quantile_levels: (f64, f64),
    pub roles: Vec<RoleReport>,
    /// Training rows where the low quantile model exceeds the high one.
    pub quantile_inversions: usize,
    pub search: Option<SearchOutcome>,
    pub elapsed_ms: u64,
}

impl TrainingReport {
    pub fn role(&self, role: ModelRole) -> Option<&RoleReport> {
        self.roles.iter().find(|r| r.role == role)
    }
}

#[derive(Debug, Clone)]
pub struct TrainedTriplet {
    pub triplet: ModelTriplet,
    pub report: TrainingReport,
}

/// One property type's work item for [`Trainer::train_all`].
#[derive(Debug, Clone, Copy)]
pub struct TrainingJob<'a> {
    pub property_type: PropertyType,
    pub schema: &'a FeatureSchema,
    pub samples: &'a [TrainingSample],
    pub hyperparameters: &'a Hyperparameters,
}

#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train the point and quantile models for one property type.
    pub fn train(
        &self,
        property_type: PropertyType,
        schema: &FeatureSchema,
        samples: &[TrainingSample],
        hyperparameters: &Hyperparameters,
    ) -> Result<TrainedTriplet> {
        let started = Instant::now();
        let conf = self.config.confidence_level;
        if !(conf > 0.0 && conf < 1.0) {
            return Err(EngineError::InvalidConfidenceLevel(conf));
        }
        self.config
            .tail_split
            .validate()
            .map_err(EngineError::InvalidHyperparameters)?;
        hyperparameters
            .validate()
            .map_err(EngineError::InvalidHyperparameters)?;
        let (x, y) = self.prepare(property_type, schema, samples)?;
        let n = samples.len();

        tracing::info!(
            property_type = %property_type,
            samples = n,
            n_estimators = hyperparameters.n_estimators,
            max_depth = hyperparameters.max_depth,
            "training model triplet"
        );

        let split = match hyperparameters.early_stopping_rounds {
            Some(_) => holdout(
                n,
                hyperparameters.validation_fraction,
                2 * hyperparameters.min_samples_leaf,
                hyperparameters.seed,
            ),
            None => None,
        };
        let (x_train, y_train, x_val, y_val) = match &split {
            Some(Fold { train, test }) => {
                let (xt, yt) = select_rows(&x, &y, train);
                let (xv, yv) = select_rows(&x, &y, test);
                (xt, yt, Some(xv), Some(yv))
            }
            None => (x, y, None, None),
        };
        let validation = match (&x_val, &y_val) {
            (Some(x), Some(y)) => Some(Validation { x, y }),
            _ => None,
        };

        let (q_low, q_high) = self.config.tail_split.quantiles(conf);
        let fit = |objective: Objective| {
            GradientBoostedTrees::fit(&x_train, &y_train, objective, hyperparameters, validation)
        };
        // Fit the three roles in parallel.
        let (point, (low, high)) = rayon::join(
            || fit(Objective::SquaredError),
            || {
                rayon::join(
                    || fit(Objective::Quantile { alpha: q_low }),
                    || fit(Objective::Quantile { alpha: q_high }),
                )
            },
        );
        let (point, low, high) = (point?, low?, high?);

        let train_rows = rows_of(&x_train);
        let val_rows = x_val.as_ref().map(rows_of);

        let quantile_inversions = train_rows
            .iter()
            .filter(|r| low.predict_row(r) > high.predict_row(r))
            .count();
        if quantile_inversions > 0 {
            tracing::debug!(
                property_type = %property_type,
                rows = quantile_inversions,
                "quantile models cross on training rows, intervals will be repaired at prediction"
            );
        }

        let residuals = match (&val_rows, &y_val) {
            (Some(rows), Some(y)) => residuals_of(&point, rows, y),
            _ => residuals_of(&point, &train_rows, &y_train),
        };
        let importance = self
            .config
            .retain_importance
            .then(|| mean_abs_contributions(&point, &train_rows));
        let baseline = point.expected_value();
        let trained_at = Utc::now();

        let mut roles = Vec::with_capacity(3);
        let mut assemble = |role: ModelRole, booster: GradientBoostedTrees| {
            let metrics = ModelMetrics {
                train: metrics_on(&booster, &train_rows, &y_train),
                validation: match (&val_rows, &y_val) {
                    (Some(rows), Some(y)) => metrics_on(&booster, rows, y),
                    _ => None,
                },
            };
            roles.push(RoleReport {
                role,
                objective: booster.objective,
                trees: booster.n_trees(),
                best_iteration: booster.best_iteration,
                metrics: metrics.clone(),
            });
            // Only the point model carries the inference extras.
            let is_point = role == ModelRole::Point;
            EnsembleModel {
                property_type,
                role,
                schema: schema.clone(),
                hyperparameters: hyperparameters.clone(),
                trained_at,
                training_size: n,
                confidence_level: conf,
                baseline: if is_point { baseline } else { booster.expected_value() },
                residuals: if is_point { residuals.clone() } else { Vec::new() },
                importance: if is_point { importance.clone() } else { None },
                metrics,
                booster,
            }
        };
        let point = assemble(ModelRole::Point, point);
        let low = assemble(ModelRole::QuantileLow, low);
        let high = assemble(ModelRole::QuantileHigh, high);
        let triplet = ModelTriplet::new(point, low, high)?;

        let report = TrainingReport {
            property_type,
            samples: n,
            train_rows: train_rows.len(),
            validation_rows: val_rows.as_ref().map_or(0, Vec::len),
            hyperparameters: hyperparameters.clone(),
            confidence_level: conf,
            quantile_levels: (q_low, q_high),
            roles,
            quantile_inversions,
            search: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let point_metrics = report
            .role(ModelRole::Point)
            .and_then(|r| r.metrics.validation.or(r.metrics.train));
        if let Some(m) = point_metrics {
            tracing::info!(
                property_type = %property_type,
                rmse = m.rmse,
                r2 = m.r2,
                elapsed_ms = report.elapsed_ms,
                "trained model triplet"
            );
        }

        Ok(TrainedTriplet { triplet, report })
    }

    /// k-fold grid search over `grid`, scored on the point model.
    pub fn search(
        &self,
        property_type: PropertyType,
        schema: &FeatureSchema,
        samples: &[TrainingSample],
        grid: &HyperparameterGrid,
        base: &Hyperparameters,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome> {
        let candidates = grid.expand(base)?;
        let (x, y) = self.prepare(property_type, schema, samples)?;
        let folds = k_fold(samples.len(), self.config.cv_folds, base.seed)?;
        tracing::info!(
            property_type = %property_type,
            candidates = candidates.len(),
            folds = folds.len(),
            "starting hyperparameter search"
        );
        cross_validate(&x, &y, &candidates, &folds, cancel)
    }

    /// Search, then train the triplet with the winning hyperparameters.
    pub fn train_with_search(
        &self,
        property_type: PropertyType,
        schema: &FeatureSchema,
        samples: &[TrainingSample],
        grid: &HyperparameterGrid,
        base: &Hyperparameters,
        cancel: &CancelToken,
    ) -> Result<TrainedTriplet> {
        let outcome = self.search(property_type, schema, samples, grid, base, cancel)?;
        cancel.check()?;
        let mut trained = self.train(property_type, schema, samples, &outcome.best)?;
        trained.report.search = Some(outcome);
        Ok(trained)
    }

    /// Train several property types concurrently; each result is independent.
    pub fn train_all(
        &self,
        jobs: &[TrainingJob<'_>],
        cancel: &CancelToken,
    ) -> Vec<(PropertyType, Result<TrainedTriplet>)> {
        jobs.par_iter()
            .map(|job| {
                let result = cancel.check().and_then(|_| {
                    self.train(job.property_type, job.schema, job.samples, job.hyperparameters)
                });
                if let Err(e) = &result {
                    tracing::warn!(
                        property_type = %job.property_type,
                        error = %e,
                        "training failed"
                    );
                }
                (job.property_type, result)
            })
            .collect()
    }

    /// Check the training set and stack it into `(X, y)`.
    fn prepare(
        &self,
        property_type: PropertyType,
        schema: &FeatureSchema,
        samples: &[TrainingSample],
    ) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let required = self.config.min_training_samples;
        if samples.len() < required {
            return Err(EngineError::InsufficientData {
                property_type,
                required,
                actual: samples.len(),
            });
        }
        schema.validate().map_err(|detail| EngineError::SchemaMismatch {
            property_type,
            detail,
        })?;

        for (i, s) in samples.iter().enumerate() {
            let v = &s.features;
            let foreign = v.property_type != property_type
                || v.schema_version != schema.version
                || v.len() != schema.len();
            if foreign {
                return Err(EngineError::SchemaMismatch {
                    property_type,
                    detail: format!(
                        "sample {i} was built for {} schema v{} with {} features, \
                         expected {property_type} v{} with {}",
                        v.property_type,
                        v.schema_version,
                        v.len(),
                        schema.version,
                        schema.len()
                    ),
                });
            }
            if !(s.sale_price.is_finite() && s.sale_price > 0.0) {
                return Err(EngineError::InvalidTrainingData(format!(
                    "sample {i} has sale price {}, expected a positive amount",
                    s.sale_price
                )));
            }
        }

        let refs: Vec<&TrainingSample> = samples.iter().collect();
        Ok(design_matrix(&refs))
    }
}

fn residuals_of(model: &GradientBoostedTrees, rows: &[Vec<f64>], y: &DVector<f64>) -> Vec<f64> {
    rows.iter().zip(y.iter()).map(|(r, &t)| t - model.predict_row(r)).collect()
}

fn metrics_on(
    model: &GradientBoostedTrees,
    rows: &[Vec<f64>],
    y: &DVector<f64>,
) -> Option<RegressionMetrics> {
    let pred: Vec<f64> = rows.iter().map(|r| model.predict_row(r)).collect();
    RegressionMetrics::compute(y.as_slice(), &pred)
}

fn mean_abs_contributions(model: &GradientBoostedTrees, rows: &[Vec<f64>]) -> Vec<f64> {
    let p = model.n_features;
    let total = rows
        .par_iter()
        .map(|r| model.contributions(r))
        .fold(
            || vec![0.0; p],
            |mut acc, phi| {
                for (a, v) in acc.iter_mut().zip(phi) {
                    *a += v.abs();
                }
                acc
            },
        )
        .reduce(
            || vec![0.0; p],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x += y;
                }
                a
            },
        );
    let n = rows.len().max(1) as f64;
    total.into_iter().map(|v| v / n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{SyntheticConfig, generate_sales};

    fn quick_hp() -> Hyperparameters {
        Hyperparameters {
            n_estimators: 40,
            max_depth: 3,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn trains_a_consistent_triplet() {
        let pt = PropertyType::SingleFamily;
        let schema = FeatureSchema::default_for(pt);
        let samples = generate_sales(pt, &schema, &SyntheticConfig::new(80, 7)).unwrap();
        let trained = Trainer::default().train(pt, &schema, &samples, &quick_hp()).unwrap();

        let t = &trained.triplet;
        assert_eq!(t.quantile_low.schema, t.point.schema);
        assert_eq!(t.quantile_high.schema, t.point.schema);
        assert_eq!(t.point.residuals.len(), 80);
        assert_eq!(t.point.importance.as_ref().map(Vec::len), Some(schema.len()));
        assert!(t.quantile_low.residuals.is_empty());
        assert_eq!(trained.report.roles.len(), 3);
        assert_eq!(trained.report.quantile_levels, (0.05, 0.95));
    }

    #[test]
    fn too_few_samples() {
        let pt = PropertyType::Condo;
        let schema = FeatureSchema::default_for(pt);
        let samples = generate_sales(pt, &schema, &SyntheticConfig::new(10, 1)).unwrap();
        let err = Trainer::default().train(pt, &schema, &samples, &quick_hp()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                required: 50,
                actual: 10,
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_prices() {
        let pt = PropertyType::Condo;
        let schema = FeatureSchema::default_for(pt);
        let mut samples = generate_sales(pt, &schema, &SyntheticConfig::new(60, 1)).unwrap();
        samples[3].sale_price = 0.0;
        assert!(matches!(
            Trainer::default().train(pt, &schema, &samples, &quick_hp()),
            Err(EngineError::InvalidTrainingData(_))
        ));
    }

    #[test]
    fn rejects_samples_for_another_type() {
        let schema = FeatureSchema::default_for(PropertyType::Condo);
        let samples =
            generate_sales(PropertyType::Condo, &schema, &SyntheticConfig::new(60, 1)).unwrap();
        assert!(matches!(
            Trainer::default().train(PropertyType::Townhouse, &schema, &samples, &quick_hp()),
            Err(EngineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn early_stopping_holds_out_a_validation_split() {
        let pt = PropertyType::Townhouse;
        let schema = FeatureSchema::default_for(pt);
        let samples = generate_sales(pt, &schema, &SyntheticConfig::new(100, 3)).unwrap();
        let hp = Hyperparameters {
            early_stopping_rounds: Some(10),
            ..quick_hp()
        };
        let trained = Trainer::default().train(pt, &schema, &samples, &hp).unwrap();
        assert_eq!(trained.report.validation_rows, 20);
        assert_eq!(trained.report.train_rows, 80);
        // Bootstrap residuals come from the held-out rows.
        assert_eq!(trained.triplet.point.residuals.len(), 20);
        let point = trained.report.role(ModelRole::Point).unwrap();
        assert!(point.metrics.validation.is_some());
        assert_eq!(point.best_iteration, Some(point.trees));
    }

    #[test]
    fn train_all_isolates_failures() {
        let trainer = Trainer::default();
        let sf = FeatureSchema::default_for(PropertyType::SingleFamily);
        let condo = FeatureSchema::default_for(PropertyType::Condo);
        let sf_samples =
            generate_sales(PropertyType::SingleFamily, &sf, &SyntheticConfig::new(60, 5)).unwrap();
        let condo_samples =
            generate_sales(PropertyType::Condo, &condo, &SyntheticConfig::new(5, 5)).unwrap();
        let hp = quick_hp();
        let jobs = [
            TrainingJob {
                property_type: PropertyType::SingleFamily,
                schema: &sf,
                samples: &sf_samples,
                hyperparameters: &hp,
            },
            TrainingJob {
                property_type: PropertyType::Condo,
                schema: &condo,
                samples: &condo_samples,
                hyperparameters: &hp,
            },
        ];
        let results = trainer.train_all(&jobs, &CancelToken::new());
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(EngineError::InsufficientData { .. })));
    }

    #[test]
    fn search_then_train_records_the_outcome() {
        let pt = PropertyType::SingleFamily;
        let schema = FeatureSchema::default_for(pt);
        let samples = generate_sales(pt, &schema, &SyntheticConfig::new(60, 11)).unwrap();
        let grid = HyperparameterGrid {
            max_depth: vec![2, 3],
            learning_rate: vec![0.1],
            n_estimators: vec![10, 20],
            subsample: vec![1.0],
            colsample: vec![1.0],
        };
        let trainer = Trainer::new(TrainerConfig {
            cv_folds: 3,
            ..TrainerConfig::default()
        });
        let trained = trainer
            .train_with_search(pt, &schema, &samples, &grid, &quick_hp(), &CancelToken::new())
            .unwrap();
        let outcome = trained.report.search.as_ref().unwrap();
        assert_eq!(outcome.candidates.len(), 4);
        assert_eq!(outcome.folds, 3);
        assert_eq!(trained.report.hyperparameters, outcome.best);
    }

    #[test]
    fn cancelled_search_returns_cancelled() {
        let pt = PropertyType::Condo;
        let schema = FeatureSchema::default_for(pt);
        let samples = generate_sales(pt, &schema, &SyntheticConfig::new(60, 2)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let res = Trainer::default().train_with_search(
            pt,
            &schema,
            &samples,
            &HyperparameterGrid::single(&quick_hp()),
            &quick_hp(),
            &token,
        );
        assert!(matches!(res, Err(EngineError::Cancelled)));
    }
}
