//! Layered configuration loading.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};

use crate::config::{ConfigError, EngineConfig};

/// Project-level config file picked up from the working directory.
pub const PROJECT_CONFIG_FILE: &str = "valuer.toml";

/// Prefix of configuration environment variables (`VALUER_STORAGE__MODEL_DIR`).
pub const ENV_PREFIX: &str = "VALUER_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the engine configuration.
    ///
    /// Priority (highest last):
    /// 1. built-in defaults
    /// 2. `./valuer.toml`
    /// 3. `explicit` path (must exist)
    /// 4. `VALUER_*` environment variables, `__` separating nested keys
    pub fn load(explicit: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        let project = PathBuf::from(PROJECT_CONFIG_FILE);
        if project.exists() {
            figment = figment.merge(Toml::file(&project));
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::extract(figment)
    }

    /// Load from one TOML string on top of the defaults (no files, no environment).
    pub fn from_toml_str(toml: &str) -> Result<EngineConfig, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::string(toml));
        Self::extract(figment)
    }

    /// The built-in defaults rendered as TOML.
    pub fn render_defaults() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&EngineConfig::default())?)
    }

    fn extract(figment: Figment) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        tracing::debug!(model_dir = %config.storage.model_dir.display(), "configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::PropertyType;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = ConfigLoader::from_toml_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn nested_tables_override_single_fields() {
        let cfg = ConfigLoader::from_toml_str(
            r#"
            [storage]
            model_dir = "/srv/models"

            [prediction]
            seed = 7

            [property_types.condo.hyperparameters]
            max_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(cfg.prediction.seed, Some(7));
        assert_eq!(cfg.prediction.bootstrap_samples, 1000);
        let condo = cfg.property_type(PropertyType::Condo);
        assert_eq!(condo.hyperparameters.max_depth, 3);
        assert_eq!(condo.hyperparameters.n_estimators, 300);
        assert_eq!(condo.storage_key, "condo");
        assert!(!condo.schema.slots.is_empty());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = ConfigLoader::from_toml_str("[training]\nconfidence_level = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("confidence_level"));
    }

    #[test]
    fn defaults_render_and_parse_back() {
        let rendered = ConfigLoader::render_defaults().unwrap();
        assert!(rendered.contains("[storage]"));
        let back = ConfigLoader::from_toml_str(&rendered).unwrap();
        assert_eq!(back, EngineConfig::default());
    }

    #[test]
    fn explicit_file_is_merged() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[training]\nmin_training_samples = 20").unwrap();
        let cfg = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(cfg.training.min_training_samples, 20);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = ConfigLoader::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }
}
