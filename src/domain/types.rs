//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the builder, trainer, predictor and attributor
//! - persisted alongside trained ensembles
//! - exported to JSON for presentation layers

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Residential property type. Selects the schema, settings and model triplet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[value(name = "single_family", alias = "single-family")]
    SingleFamily,
    Condo,
    Townhouse,
}

impl PropertyType {
    pub const ALL: [PropertyType; 3] = [
        PropertyType::SingleFamily,
        PropertyType::Condo,
        PropertyType::Townhouse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyType::SingleFamily => "single_family",
            PropertyType::Condo => "condo",
            PropertyType::Townhouse => "townhouse",
        }
    }

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            PropertyType::SingleFamily => "Single-family",
            PropertyType::Condo => "Condo",
            PropertyType::Townhouse => "Townhouse",
        }
    }

    /// Parse the loose spellings found in sales exports.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "single_family" | "sfr" | "sfh" => Some(PropertyType::SingleFamily),
            "condo" | "condominium" => Some(PropertyType::Condo),
            "townhouse" | "townhome" => Some(PropertyType::Townhouse),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an ensemble within a property type's triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Point,
    QuantileLow,
    QuantileHigh,
}

impl ModelRole {
    pub const ALL: [ModelRole; 3] =
        [ModelRole::Point, ModelRole::QuantileLow, ModelRole::QuantileHigh];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelRole::Point => "point",
            ModelRole::QuantileLow => "quantile_low",
            ModelRole::QuantileHigh => "quantile_high",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic type of a feature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Any finite number (square feet, distances, rates).
    Continuous,
    /// Whole, non-negative counts (bedrooms, garage spaces).
    Count,
    /// Whole-number score on a 0–10 scale.
    Ordinal,
    /// 0/1 flag. Booleans and yes/no strings are accepted.
    Binary,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeatureKind::Continuous => "continuous",
            FeatureKind::Count => "count",
            FeatureKind::Ordinal => "ordinal (0-10)",
            FeatureKind::Binary => "binary",
        };
        f.write_str(label)
    }
}

/// One value in a caller-supplied raw feature mapping.
///
/// Upstream collaborators hand over JSON objects or CSV cells, so a value may
/// arrive as a number, a boolean, or text that still needs coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Number(v) => write!(f, "{v}"),
            RawValue::Bool(v) => write!(f, "{v}"),
            RawValue::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Raw feature mapping as supplied by callers. Ordered so every pass over it is deterministic.
pub type RawFeatures = BTreeMap<String, RawValue>;

/// A validated feature vector, values stored in schema declaration order.
///
/// The last `derived` values are the schema's derived features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub property_type: PropertyType,
    pub schema_version: u32,
    names: Vec<String>,
    values: Vec<f64>,
    #[serde(default)]
    derived: usize,
    /// Slots whose raw value was clamped onto a bound (non-fatal warning).
    pub clamped: Vec<String>,
}

impl FeatureVector {
    pub(crate) fn new(
        property_type: PropertyType,
        schema_version: u32,
        names: Vec<String>,
        values: Vec<f64>,
        derived: usize,
        clamped: Vec<String>,
    ) -> Self {
        debug_assert_eq!(names.len(), values.len());
        debug_assert!(derived <= values.len());
        Self {
            property_type,
            schema_version,
            names,
            values,
            derived,
            clamped,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// The vector's input slot values as a raw mapping (rebuilding from it is a no-op).
    pub fn to_raw(&self) -> RawFeatures {
        let inputs = self.values.len().saturating_sub(self.derived);
        self.names
            .iter()
            .zip(self.values.iter())
            .take(inputs)
            .map(|(n, &v)| (n.clone(), RawValue::Number(v)))
            .collect()
    }
}

/// One observed sale used for training.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub sale_price: f64,
}

impl TrainingSample {
    pub fn new(features: FeatureVector, sale_price: f64) -> Self {
        Self {
            features,
            sale_price,
        }
    }
}

/// Boosted-tree hyperparameters.
///
/// Defaults mirror the valuation desk's historical settings (depth 6, eta 0.1,
/// 80% row and column sampling, seed 42).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub n_estimators: usize,
    /// Row sampling fraction per tree, in (0, 1].
    pub subsample: f64,
    /// Column sampling fraction per tree, in (0, 1].
    pub colsample: f64,
    pub min_samples_leaf: usize,
    /// Minimum variance reduction required to split a node.
    pub min_split_gain: f64,
    /// Stop after this many rounds without validation improvement.
    pub early_stopping_rounds: Option<usize>,
    /// Share of the training set held out when early stopping is enabled.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            max_depth: 6,
            learning_rate: 0.1,
            n_estimators: 300,
            subsample: 0.8,
            colsample: 0.8,
            min_samples_leaf: 1,
            min_split_gain: 0.0,
            early_stopping_rounds: None,
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be >= 1".to_string());
        }
        let rate = self.learning_rate;
        if !(rate.is_finite() && rate > 0.0 && rate <= 1.0) {
            return Err(format!("learning_rate must lie in (0, 1], got {}", self.learning_rate));
        }
        if self.n_estimators == 0 {
            return Err("n_estimators must be >= 1".to_string());
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(format!("subsample must lie in (0, 1], got {}", self.subsample));
        }
        if !(self.colsample > 0.0 && self.colsample <= 1.0) {
            return Err(format!("colsample must lie in (0, 1], got {}", self.colsample));
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be >= 1".to_string());
        }
        if !(self.min_split_gain.is_finite() && self.min_split_gain >= 0.0) {
            return Err(format!("min_split_gain must be >= 0, got {}", self.min_split_gain));
        }
        if !(self.validation_fraction >= 0.0 && self.validation_fraction < 1.0) {
            return Err(format!(
                "validation_fraction must lie in [0, 1), got {}",
                self.validation_fraction
            ));
        }
        if self.early_stopping_rounds == Some(0) {
            return Err("early_stopping_rounds must be >= 1 when set".to_string());
        }
        Ok(())
    }
}

/// How the miss probability `1 - confidence` is split between the two tails.
///
/// `lower_share = 0.5` gives symmetric tails (confidence 0.90 → quantiles 0.05 / 0.95).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailSplit {
    pub lower_share: f64,
}

impl Default for TailSplit {
    fn default() -> Self {
        Self { lower_share: 0.5 }
    }
}

impl TailSplit {
    pub fn symmetric() -> Self {
        Self::default()
    }

    /// Lower and upper quantile levels for a confidence level.
    pub fn quantiles(self, confidence_level: f64) -> (f64, f64) {
        let miss = 1.0 - confidence_level;
        let lower = miss * self.lower_share;
        let upper = 1.0 - miss * (1.0 - self.lower_share);
        (lower, upper)
    }

    pub fn validate(self) -> Result<(), String> {
        if !(self.lower_share > 0.0 && self.lower_share < 1.0) {
            return Err(format!("tail lower_share must lie in (0, 1), got {}", self.lower_share));
        }
        Ok(())
    }
}

/// Which estimator produced a valuation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalMethod {
    /// Quantile-low / quantile-high ensembles.
    Quantile,
    /// Resampled training residuals around the point estimate.
    Bootstrap,
    /// Normal draws scaled by the configured default relative error.
    Parametric,
}

/// Result of one valuation. Created per call, never stored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub property_type: PropertyType,
    pub point_estimate: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    pub confidence_level: f64,
    pub interval_method: IntervalMethod,
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    /// Interval bounds had to be reordered or widened to contain the point estimate.
    pub repaired: bool,
    pub clamped_features: Vec<String>,
}

impl ValuationResult {
    pub fn interval_width(&self) -> f64 {
        self.interval_high - self.interval_low
    }
}

/// Signed contribution of one feature to a point estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
    /// 1-based rank by absolute contribution.
    pub rank: usize,
}

/// Additive breakdown of a point estimate: `baseline + Σ contributions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub property_type: PropertyType,
    pub baseline: f64,
    pub point_estimate: f64,
    pub contributions: Vec<FeatureContribution>,
}

impl Explanation {
    pub fn total_contribution(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }
}
