//! Trained ensembles and the handles the store returns for inference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FeatureSchema, FeatureVector, Hyperparameters, ModelRole, PropertyType};
use crate::error::{EngineError, Result};
use crate::math::RegressionMetrics;
use crate::models::booster::{Booster, GradientBoostedTrees, Objective};

/// Confidence levels and quantile spans closer than this are treated as equal.
const LEVEL_TOLERANCE: f64 = 1e-9;

/// Fit quality recorded at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub train: Option<RegressionMetrics>,
    /// Holdout metrics, present when a validation split was used.
    pub validation: Option<RegressionMetrics>,
}

/// One trained boosted model plus everything needed to use it on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub property_type: PropertyType,
    pub role: ModelRole,
    pub schema: FeatureSchema,
    pub hyperparameters: Hyperparameters,
    pub trained_at: DateTime<Utc>,
    pub training_size: usize,
    /// Confidence level the quantile roles of this triplet were fitted for.
    pub confidence_level: f64,
    /// Mean prediction over the training rows; the attribution baseline.
    pub baseline: f64,
    /// Observed minus predicted prices, used by the bootstrap interval.
    pub residuals: Vec<f64>,
    /// Mean absolute attribution per schema slot over the training rows.
    pub importance: Option<Vec<f64>>,
    pub metrics: ModelMetrics,
    #[serde(with = "booster_payload")]
    pub booster: GradientBoostedTrees,
}

/// The booster is persisted as the hex of its own `Booster::to_bytes` payload.
mod booster_payload {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::models::booster::{Booster, GradientBoostedTrees};

    pub fn serialize<S: Serializer>(
        booster: &GradientBoostedTrees,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let bytes = booster.to_bytes().map_err(S::Error::custom)?;
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<GradientBoostedTrees, D::Error> {
        let payload = String::deserialize(deserializer)?;
        let bytes = hex::decode(payload).map_err(D::Error::custom)?;
        GradientBoostedTrees::from_bytes(&bytes).map_err(D::Error::custom)
    }
}

impl EnsembleModel {
    pub fn objective(&self) -> Objective {
        self.booster.objective
    }

    pub fn schema_version(&self) -> u32 {
        self.schema.version
    }

    /// Human-readable model version, e.g. `v1-20240101T000000Z`.
    pub fn version(&self) -> String {
        format!("v{}-{}", self.schema.version, self.trained_at.format("%Y%m%dT%H%M%SZ"))
    }

    /// Reject vectors built for another property type or schema.
    pub fn check_vector(&self, vector: &FeatureVector) -> Result<()> {
        if vector.property_type != self.property_type {
            return Err(EngineError::SchemaMismatch {
                property_type: self.property_type,
                detail: format!(
                    "vector was built for {}, model serves {}",
                    vector.property_type, self.property_type
                ),
            });
        }
        if vector.schema_version != self.schema.version {
            return Err(EngineError::SchemaMismatch {
                property_type: self.property_type,
                detail: format!(
                    "vector schema version {} does not match model schema version {}",
                    vector.schema_version, self.schema.version
                ),
            });
        }
        if vector.len() != self.schema.len() || vector.len() != self.booster.n_features {
            return Err(EngineError::SchemaMismatch {
                property_type: self.property_type,
                detail: format!(
                    "vector has {} features, model expects {}",
                    vector.len(),
                    self.schema.len()
                ),
            });
        }
        Ok(())
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<f64> {
        self.check_vector(vector)?;
        Ok(self.booster.predict_row(vector.values()))
    }

    /// Per-slot attributions; sums to `predict(vector) - baseline`.
    pub fn contributions(&self, vector: &FeatureVector) -> Result<Vec<f64>> {
        self.check_vector(vector)?;
        Ok(self.booster.contributions(vector.values()))
    }
}

/// The three per-type models that together produce a valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTriplet {
    pub point: EnsembleModel,
    pub quantile_low: EnsembleModel,
    pub quantile_high: EnsembleModel,
}

impl ModelTriplet {
    /// Assemble a triplet; all three must serve one property type with one schema
    /// and come out of the same training run.
    pub fn new(
        point: EnsembleModel,
        quantile_low: EnsembleModel,
        quantile_high: EnsembleModel,
    ) -> Result<Self> {
        let pt = point.property_type;
        for (model, role) in [
            (&point, ModelRole::Point),
            (&quantile_low, ModelRole::QuantileLow),
            (&quantile_high, ModelRole::QuantileHigh),
        ] {
            if model.role != role {
                return Err(EngineError::SchemaMismatch {
                    property_type: pt,
                    detail: format!("expected a {role} model, got {}", model.role),
                });
            }
            if model.property_type != pt {
                return Err(EngineError::SchemaMismatch {
                    property_type: pt,
                    detail: format!("{role} model serves {}", model.property_type),
                });
            }
            if model.schema != point.schema {
                return Err(EngineError::SchemaMismatch {
                    property_type: pt,
                    detail: format!(
                        "{role} model uses schema version {}, point model uses {}",
                        model.schema.version, point.schema.version
                    ),
                });
            }
        }
        check_same_run(&point, &quantile_low, &quantile_high)?;
        Ok(Self {
            point,
            quantile_low,
            quantile_high,
        })
    }

    pub fn property_type(&self) -> PropertyType {
        self.point.property_type
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.point.schema
    }

    pub fn get(&self, role: ModelRole) -> &EnsembleModel {
        match role {
            ModelRole::Point => &self.point,
            ModelRole::QuantileLow => &self.quantile_low,
            ModelRole::QuantileHigh => &self.quantile_high,
        }
    }

    /// Confidence level the quantile roles were trained for.
    pub fn confidence_level(&self) -> f64 {
        self.point.confidence_level
    }
}

/// The quantile roles must share the point model's run and bracket its confidence level.
fn check_same_run(point: &EnsembleModel, low: &EnsembleModel, high: &EnsembleModel) -> Result<()> {
    let mixed = |detail: String| EngineError::MixedTriplet {
        property_type: point.property_type,
        detail,
    };
    for model in [low, high] {
        if model.trained_at != point.trained_at {
            return Err(mixed(format!(
                "{} model was trained at {}, point model at {}",
                model.role, model.trained_at, point.trained_at
            )));
        }
        if (model.confidence_level - point.confidence_level).abs() > LEVEL_TOLERANCE {
            return Err(mixed(format!(
                "{} model was fitted for confidence {}, point model for {}",
                model.role, model.confidence_level, point.confidence_level
            )));
        }
    }

    let objectives = (low.objective(), high.objective());
    let (Objective::Quantile { alpha: lo }, Objective::Quantile { alpha: hi }) = objectives else {
        return Err(mixed("quantile roles must use the pinball objective".to_string()));
    };
    if lo >= hi || ((hi - lo) - point.confidence_level).abs() > LEVEL_TOLERANCE {
        return Err(mixed(format!(
            "quantiles {lo} / {hi} do not span confidence {}",
            point.confidence_level
        )));
    }
    Ok(())
}

/// Models available for inference on one property type.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedModels {
    Triplet(ModelTriplet),
    /// Only the point model is stored; intervals come from the bootstrap.
    PointOnly(EnsembleModel),
}

impl LoadedModels {
    pub fn point(&self) -> &EnsembleModel {
        match self {
            LoadedModels::Triplet(t) => &t.point,
            LoadedModels::PointOnly(m) => m,
        }
    }

    pub fn property_type(&self) -> PropertyType {
        self.point().property_type
    }

    pub fn is_triplet(&self) -> bool {
        matches!(self, LoadedModels::Triplet(_))
    }
}

impl From<ModelTriplet> for LoadedModels {
    fn from(t: ModelTriplet) -> Self {
        LoadedModels::Triplet(t)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::TimeZone;
    use nalgebra::{DMatrix, DVector};

    use super::*;
    use crate::models::booster::Booster;

    /// A tiny fitted model over `schema`, for store and predictor tests.
    pub fn toy_model(
        property_type: PropertyType,
        role: ModelRole,
        schema: FeatureSchema,
    ) -> EnsembleModel {
        let p = schema.len();
        let x = DMatrix::from_fn(20, p, |i, j| (i + j) as f64);
        let y = DVector::from_fn(20, |i, _| 1000.0 + 50.0 * i as f64);
        let objective = match role {
            ModelRole::Point => Objective::SquaredError,
            ModelRole::QuantileLow => Objective::Quantile { alpha: 0.05 },
            ModelRole::QuantileHigh => Objective::Quantile { alpha: 0.95 },
        };
        let hyperparameters = Hyperparameters {
            n_estimators: 5,
            max_depth: 2,
            ..Hyperparameters::default()
        };
        let booster = GradientBoostedTrees::fit(&x, &y, objective, &hyperparameters, None)
            .expect("toy fit");
        EnsembleModel {
            property_type,
            role,
            schema,
            hyperparameters,
            trained_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date"),
            training_size: 20,
            confidence_level: 0.9,
            baseline: booster.expected_value(),
            residuals: vec![-20.0, -10.0, 0.0, 10.0, 20.0],
            importance: None,
            metrics: ModelMetrics {
                train: None,
                validation: None,
            },
            booster,
        }
    }
}
