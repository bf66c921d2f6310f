//! Engine configuration.
//!
//! Everything the engine needs at construction time, in one serializable tree:
//!
//! ```toml
//! [storage]
//! model_dir = "models"
//!
//! [training]
//! min_training_samples = 50
//! confidence_level = 0.9
//!
//! [prediction]
//! bootstrap_samples = 1000
//!
//! [property_types.condo]
//! storage_key = "condo"
//! [property_types.condo.hyperparameters]
//! max_depth = 4
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::domain::{FeatureSchema, Hyperparameters, PropertyType};
use crate::features::UnknownKeyPolicy;
use crate::fit::{HyperparameterGrid, TrainerConfig};
use crate::predict::PredictorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory of the file model store.
    pub model_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
        }
    }
}

/// Settings owned by one property type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyTypeSettings {
    pub schema: FeatureSchema,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    /// Directory name under `storage.model_dir`.
    pub storage_key: String,
    /// What `build_vector` does with keys the schema does not declare.
    #[serde(default)]
    pub unknown_keys: UnknownKeyPolicy,
    /// Grid used by `--search`; the built-in grid when absent.
    #[serde(default)]
    pub search_grid: Option<HyperparameterGrid>,
}

impl PropertyTypeSettings {
    pub fn default_for(property_type: PropertyType) -> Self {
        Self {
            schema: FeatureSchema::default_for(property_type),
            hyperparameters: Hyperparameters::default(),
            storage_key: property_type.as_str().to_string(),
            unknown_keys: UnknownKeyPolicy::default(),
            search_grid: None,
        }
    }

    pub fn grid(&self) -> HyperparameterGrid {
        self.search_grid.clone().unwrap_or_default()
    }
}

/// One entry per property type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyTypeTable {
    pub single_family: PropertyTypeSettings,
    pub condo: PropertyTypeSettings,
    pub townhouse: PropertyTypeSettings,
}

impl Default for PropertyTypeTable {
    fn default() -> Self {
        Self {
            single_family: PropertyTypeSettings::default_for(PropertyType::SingleFamily),
            condo: PropertyTypeSettings::default_for(PropertyType::Condo),
            townhouse: PropertyTypeSettings::default_for(PropertyType::Townhouse),
        }
    }
}

impl PropertyTypeTable {
    pub fn get(&self, property_type: PropertyType) -> &PropertyTypeSettings {
        match property_type {
            PropertyType::SingleFamily => &self.single_family,
            PropertyType::Condo => &self.condo,
            PropertyType::Townhouse => &self.townhouse,
        }
    }

    pub fn get_mut(&mut self, property_type: PropertyType) -> &mut PropertyTypeSettings {
        match property_type {
            PropertyType::SingleFamily => &mut self.single_family,
            PropertyType::Condo => &mut self.condo,
            PropertyType::Townhouse => &mut self.townhouse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageSettings,
    pub training: TrainerConfig,
    pub prediction: PredictorConfig,
    pub property_types: PropertyTypeTable,
}

impl EngineConfig {
    pub fn property_type(&self, property_type: PropertyType) -> &PropertyTypeSettings {
        self.property_types.get(property_type)
    }

    /// Check every schema, hyperparameter set and engine-wide setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |section: String, detail: String| ConfigError::Invalid { section, detail };

        let t = &self.training;
        if t.min_training_samples < 2 {
            return Err(invalid(
                "training".to_string(),
                format!("min_training_samples must be >= 2, got {}", t.min_training_samples),
            ));
        }
        if t.cv_folds < 2 {
            return Err(invalid(
                "training".to_string(),
                format!("cv_folds must be >= 2, got {}", t.cv_folds),
            ));
        }
        if !(t.confidence_level > 0.0 && t.confidence_level < 1.0) {
            return Err(invalid(
                "training".to_string(),
                format!("confidence_level must lie in (0, 1), got {}", t.confidence_level),
            ));
        }
        t.tail_split
            .validate()
            .map_err(|d| invalid("training.tail_split".to_string(), d))?;
        self.prediction
            .validate()
            .map_err(|d| invalid("prediction".to_string(), d))?;

        let mut keys: Vec<&str> = Vec::with_capacity(PropertyType::ALL.len());
        for pt in PropertyType::ALL {
            let s = self.property_type(pt);
            let section = format!("property_types.{pt}");
            s.schema
                .validate()
                .map_err(|d| invalid(format!("{section}.schema"), d))?;
            s.hyperparameters
                .validate()
                .map_err(|d| invalid(format!("{section}.hyperparameters"), d))?;
            if let Some(grid) = &s.search_grid {
                grid.expand(&s.hyperparameters)
                    .map_err(|e| invalid(format!("{section}.search_grid"), e.to_string()))?;
            }
            let key = s.storage_key.trim();
            if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
                return Err(invalid(
                    section,
                    format!("storage_key '{}' is not a plain directory name", s.storage_key),
                ));
            }
            if keys.contains(&key) {
                return Err(invalid(section, format!("storage_key '{key}' is used twice")));
            }
            keys.push(key);
        }
        Ok(())
    }
}
