//! Error types.
//!
//! - [`ValidationError`]: caller input defects found while building a feature vector
//! - [`EngineError`]: everything the valuation engine can report
//! - [`AppError`]: what the `valuer` binary prints, paired with a process exit code

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{FeatureKind, ModelRole, PropertyType};

/// Result alias used across the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Input defects in a raw feature mapping. Always reported, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required feature '{feature}'")]
    MissingFeature { feature: String },

    #[error("unknown feature '{feature}'")]
    UnknownFeature { feature: String },

    #[error("feature '{feature}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        feature: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("feature '{feature}' expects a {expected} value, got {found}")]
    TypeMismatch {
        feature: String,
        expected: FeatureKind,
        found: String,
    },
}

/// Errors surfaced by the valuation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no {role} model stored for {property_type}")]
    NotFound {
        property_type: PropertyType,
        role: ModelRole,
    },

    #[error("incomplete model triplet for {property_type}: only {present:?} stored")]
    PartialTriplet {
        property_type: PropertyType,
        present: Vec<ModelRole>,
    },

    #[error("schema mismatch for {property_type}: {detail}")]
    SchemaMismatch {
        property_type: PropertyType,
        detail: String,
    },

    #[error(
        "insufficient training data for {property_type}: {actual} samples, need at least {required}"
    )]
    InsufficientData {
        property_type: PropertyType,
        required: usize,
        actual: usize,
    },

    #[error("invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    #[error("invalid hyperparameter search: {0}")]
    InvalidGrid(String),

    #[error("model triplet for {property_type} mixes training runs: {detail}")]
    MixedTriplet {
        property_type: PropertyType,
        detail: String,
    },

    #[error("no trained model for {property_type}")]
    ModelNotTrained { property_type: PropertyType },

    #[error("global feature importance is unavailable for {property_type}")]
    ImportanceUnavailable { property_type: PropertyType },

    #[error("confidence level must lie strictly between 0 and 1, got {0}")]
    InvalidConfidenceLevel(f64),

    #[error("training cancelled")]
    Cancelled,

    #[error("model storage error at '{}': {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Exit code used by the `valuer` binary for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Validation(_)
            | EngineError::InsufficientData { .. }
            | EngineError::InvalidTrainingData(_)
            | EngineError::InvalidConfidenceLevel(_) => 3,
            EngineError::InvalidHyperparameters(_) | EngineError::InvalidGrid(_) => 2,
            EngineError::Storage { .. } => 2,
            EngineError::Cancelled => 5,
            EngineError::NotFound { .. }
            | EngineError::PartialTriplet { .. }
            | EngineError::MixedTriplet { .. }
            | EngineError::SchemaMismatch { .. }
            | EngineError::ModelNotTrained { .. }
            | EngineError::ImportanceUnavailable { .. }
            | EngineError::Serialization(_) => 4,
        }
    }
}

/// Error printed by the binary before exiting with `exit_code`.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::new(3, err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(2, err.to_string())
    }
}
