//! Point estimate + uncertainty interval for one feature vector.
//!
//! Two paths:
//! - triplet: quantile models trained for the requested confidence give the
//!   bounds directly (reordered around the point when they cross)
//! - fallback: point-only models, or a confidence the quantiles were not
//!   trained for, resample stored residuals; without usable residuals the
//!   interval is drawn from a normal with the configured relative error

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{FeatureVector, IntervalMethod, TailSplit, ValuationResult};
use crate::error::{EngineError, Result};
use crate::models::LoadedModels;
use crate::predict::interval::{
    bootstrap_interval, is_degenerate, parametric_interval, repair_ordering,
};

/// Confidence levels closer than this are treated as the same level.
const CONFIDENCE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Resamples drawn for bootstrap and parametric intervals.
    pub bootstrap_samples: usize,
    /// Relative standard deviation of the parametric fallback.
    pub default_relative_error: f64,
    /// Fixed RNG seed; `None` draws from OS entropy on every call.
    pub seed: Option<u64>,
    /// Never report a negative lower bound for a non-negative estimate.
    pub floor_at_zero: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            bootstrap_samples: 1000,
            default_relative_error: 0.10,
            seed: None,
            floor_at_zero: true,
        }
    }
}

impl PredictorConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bootstrap_samples < 2 {
            return Err(format!("bootstrap_samples must be >= 2, got {}", self.bootstrap_samples));
        }
        if !(self.default_relative_error.is_finite() && self.default_relative_error > 0.0) {
            return Err(format!(
                "default_relative_error must be > 0, got {}",
                self.default_relative_error
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Predictor {
    config: PredictorConfig,
    tails: TailSplit,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            tails: TailSplit::default(),
        }
    }

    /// How fallback intervals split the miss probability between the tails.
    pub fn with_tail_split(mut self, tails: TailSplit) -> Self {
        self.tails = tails;
        self
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn predict(
        &self,
        models: &LoadedModels,
        vector: &FeatureVector,
        confidence_level: f64,
    ) -> Result<ValuationResult> {
        self.predict_with(models, vector, confidence_level, self.config.seed)
    }

    /// Same as [`predict`](Self::predict) with an explicit RNG seed.
    pub fn predict_seeded(
        &self,
        models: &LoadedModels,
        vector: &FeatureVector,
        confidence_level: f64,
        seed: u64,
    ) -> Result<ValuationResult> {
        self.predict_with(models, vector, confidence_level, Some(seed))
    }

    /// Value each vector independently; one failure never affects the others.
    pub fn predict_many(
        &self,
        models: &LoadedModels,
        vectors: &[FeatureVector],
        confidence_level: f64,
    ) -> Vec<Result<ValuationResult>> {
        vectors
            .par_iter()
            .map(|v| self.predict_with(models, v, confidence_level, self.config.seed))
            .collect()
    }

    fn predict_with(
        &self,
        models: &LoadedModels,
        vector: &FeatureVector,
        confidence_level: f64,
        seed: Option<u64>,
    ) -> Result<ValuationResult> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(EngineError::InvalidConfidenceLevel(confidence_level));
        }
        let point_model = models.point();
        let point = point_model.predict(vector)?;

        let (low, high, method) = match models {
            LoadedModels::Triplet(t)
                if (t.confidence_level() - confidence_level).abs() <= CONFIDENCE_TOLERANCE =>
            {
                let low = t.quantile_low.predict(vector)?;
                let high = t.quantile_high.predict(vector)?;
                (low, high, IntervalMethod::Quantile)
            }
            _ => {
                if let LoadedModels::Triplet(t) = models {
                    tracing::info!(
                        property_type = %t.property_type(),
                        trained = t.confidence_level(),
                        requested = confidence_level,
                        "quantile models were trained for another confidence level, using bootstrap"
                    );
                }
                self.fallback_interval(point, &point_model.residuals, confidence_level, seed)
            }
        };

        let (mut low, high, repaired) = repair_ordering(point, low, high);
        if repaired {
            tracing::warn!(
                property_type = %point_model.property_type,
                point,
                low,
                high,
                "interval bounds were reordered around the point estimate"
            );
        }
        if self.config.floor_at_zero && point >= 0.0 && low < 0.0 {
            low = 0.0;
        }

        Ok(ValuationResult {
            property_type: point_model.property_type,
            point_estimate: point,
            interval_low: low,
            interval_high: high,
            confidence_level,
            interval_method: method,
            model_version: point_model.version(),
            trained_at: point_model.trained_at,
            repaired,
            clamped_features: vector.clamped.clone(),
        })
    }

    fn fallback_interval(
        &self,
        point: f64,
        residuals: &[f64],
        confidence_level: f64,
        seed: Option<u64>,
    ) -> (f64, f64, IntervalMethod) {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let levels = self.tails.quantiles(confidence_level);
        let draws = self.config.bootstrap_samples;

        if let Some((low, high)) = bootstrap_interval(&mut rng, point, residuals, draws, levels) {
            if !is_degenerate(point, low, high) {
                return (low, high, IntervalMethod::Bootstrap);
            }
            tracing::warn!(point, "bootstrap interval is degenerate, using parametric interval");
        }
        let relative_error = self.config.default_relative_error;
        let (low, high) = parametric_interval(&mut rng, point, relative_error, draws, levels);
        (low, high, IntervalMethod::Parametric)
    }
}
