//! Hyperparameter grid generation.
//!
//! Search is a deterministic cartesian product over a handful of axes. The
//! expansion order is fixed (row-major in field order), so candidate indices
//! are stable across runs and can break ties.

use serde::{Deserialize, Serialize};

use crate::domain::Hyperparameters;
use crate::error::{EngineError, Result};

/// Candidate values per tuned hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparameterGrid {
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub n_estimators: Vec<usize>,
    pub subsample: Vec<f64>,
    pub colsample: Vec<f64>,
}

impl Default for HyperparameterGrid {
    /// The valuation desk's historical tuning grid (243 candidates).
    fn default() -> Self {
        Self {
            max_depth: vec![3, 5, 7],
            learning_rate: vec![0.01, 0.1, 0.2],
            n_estimators: vec![100, 200, 300],
            subsample: vec![0.6, 0.8, 1.0],
            colsample: vec![0.6, 0.8, 1.0],
        }
    }
}

impl HyperparameterGrid {
    /// A grid containing exactly `base`.
    pub fn single(base: &Hyperparameters) -> Self {
        Self {
            max_depth: vec![base.max_depth],
            learning_rate: vec![base.learning_rate],
            n_estimators: vec![base.n_estimators],
            subsample: vec![base.subsample],
            colsample: vec![base.colsample],
        }
    }

    pub fn len(&self) -> usize {
        self.max_depth.len()
            * self.learning_rate.len()
            * self.n_estimators.len()
            * self.subsample.len()
            * self.colsample.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand over `base`; untuned fields keep the base value.
    ///
    /// Every candidate is validated, so a bad axis value fails before any fitting starts.
    pub fn expand(&self, base: &Hyperparameters) -> Result<Vec<Hyperparameters>> {
        for (axis, len) in [
            ("max_depth", self.max_depth.len()),
            ("learning_rate", self.learning_rate.len()),
            ("n_estimators", self.n_estimators.len()),
            ("subsample", self.subsample.len()),
            ("colsample", self.colsample.len()),
        ] {
            if len == 0 {
                return Err(EngineError::InvalidGrid(format!("axis '{axis}' has no values")));
            }
        }

        let mut out = Vec::with_capacity(self.len());
        for &max_depth in &self.max_depth {
            for &learning_rate in &self.learning_rate {
                for &n_estimators in &self.n_estimators {
                    for &subsample in &self.subsample {
                        for &colsample in &self.colsample {
                            let candidate = Hyperparameters {
                                max_depth,
                                learning_rate,
                                n_estimators,
                                subsample,
                                colsample,
                                ..base.clone()
                            };
                            candidate.validate().map_err(|e| {
                                EngineError::InvalidGrid(format!("candidate {}: {e}", out.len()))
                            })?;
                            out.push(candidate);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}
