//! JSON file store.
//!
//! Layout: `<root>/<storage_key>/<role>.json`. A save serializes into a
//! temporary file in the target directory, syncs it, then renames it over the
//! target, so a concurrent reader sees either the old model or the new one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::{ModelRole, PropertyType};
use crate::error::{EngineError, Result};
use crate::models::EnsembleModel;
use crate::store::{ModelHandle, ModelStore, check_key};

#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
    keys: BTreeMap<PropertyType, String>,
}

impl FileModelStore {
    /// Store rooted at `root`, one directory per property type name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let keys = PropertyType::ALL
            .into_iter()
            .map(|pt| (pt, pt.as_str().to_string()))
            .collect();
        Self {
            root: root.into(),
            keys,
        }
    }

    /// Override the directory name used for one property type.
    pub fn with_storage_key(mut self, property_type: PropertyType, key: impl Into<String>) -> Self {
        self.keys.insert(property_type, key.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, property_type: PropertyType) -> PathBuf {
        let key = self
            .keys
            .get(&property_type)
            .map(String::as_str)
            .unwrap_or(property_type.as_str());
        self.root.join(key)
    }

    pub fn model_path(&self, property_type: PropertyType, role: ModelRole) -> PathBuf {
        self.type_dir(property_type).join(format!("{}.json", role.as_str()))
    }
}

impl ModelStore for FileModelStore {
    fn save(
        &self,
        property_type: PropertyType,
        role: ModelRole,
        model: &EnsembleModel,
    ) -> Result<ModelHandle> {
        check_key(property_type, role, model)?;

        let dir = self.type_dir(property_type);
        fs::create_dir_all(&dir).map_err(|e| EngineError::storage(&dir, e))?;
        let target = self.model_path(property_type, role);

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| EngineError::storage(&dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, model)?;
            writer.flush().map_err(|e| EngineError::storage(&target, e))?;
        }
        tmp.as_file().sync_all().map_err(|e| EngineError::storage(&target, e))?;
        tmp.persist(&target).map_err(|e| EngineError::storage(&target, e.error))?;

        tracing::info!(
            property_type = %property_type,
            role = %role,
            path = %target.display(),
            "saved model"
        );

        Ok(ModelHandle {
            property_type,
            role,
            version: model.version(),
            location: target.display().to_string(),
        })
    }

    fn load(&self, property_type: PropertyType, role: ModelRole) -> Result<EnsembleModel> {
        let path = self.model_path(property_type, role);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::NotFound { property_type, role });
            }
            Err(e) => return Err(EngineError::storage(&path, e)),
        };
        let model: EnsembleModel = serde_json::from_slice(&bytes)?;
        check_key(property_type, role, &model)?;
        tracing::debug!(
            property_type = %property_type,
            role = %role,
            version = %model.version(),
            "loaded model"
        );
        Ok(model)
    }
}
