//! Model persistence.
//!
//! Stores are keyed by `(PropertyType, ModelRole)` and hand models back as
//! explicit values; nothing is cached behind the caller's back. Two
//! implementations ship:
//!
//! - [`FileModelStore`]: one JSON file per role, published by atomic rename
//! - [`MemoryModelStore`]: a locked map, for tests and embedding

pub mod file;
pub mod memory;

pub use file::*;
pub use memory::*;

use serde::Serialize;

use crate::domain::{ModelRole, PropertyType};
use crate::error::{EngineError, Result};
use crate::models::{EnsembleModel, LoadedModels, ModelTriplet};

/// Where a saved model ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelHandle {
    pub property_type: PropertyType,
    pub role: ModelRole,
    pub version: String,
    pub location: String,
}

pub trait ModelStore: Send + Sync {
    /// Publish `model` under `(property_type, role)`, replacing any previous model.
    fn save(
        &self,
        property_type: PropertyType,
        role: ModelRole,
        model: &EnsembleModel,
    ) -> Result<ModelHandle>;

    fn load(&self, property_type: PropertyType, role: ModelRole) -> Result<EnsembleModel>;

    /// Load all three roles.
    ///
    /// - `NotFound` when no role is stored
    /// - `PartialTriplet` when one or two are
    /// - `SchemaMismatch` when the stored roles disagree on schema
    /// - `MixedTriplet` when the roles come from different training runs
    fn load_triplet(&self, property_type: PropertyType) -> Result<ModelTriplet> {
        let mut loaded = Vec::with_capacity(3);
        for role in ModelRole::ALL {
            match self.load(property_type, role) {
                Ok(model) => loaded.push(Some(model)),
                Err(EngineError::NotFound { .. }) => loaded.push(None),
                Err(e) => return Err(e),
            }
        }

        let present: Vec<ModelRole> = ModelRole::ALL
            .into_iter()
            .zip(&loaded)
            .filter(|(_, m)| m.is_some())
            .map(|(role, _)| role)
            .collect();

        let mut it = loaded.into_iter();
        match (it.next().flatten(), it.next().flatten(), it.next().flatten()) {
            (Some(point), Some(low), Some(high)) => ModelTriplet::new(point, low, high),
            _ if present.is_empty() => Err(EngineError::NotFound {
                property_type,
                role: ModelRole::Point,
            }),
            _ => Err(EngineError::PartialTriplet {
                property_type,
                present,
            }),
        }
    }

    /// Models usable for valuation: the full triplet, or the point model alone
    /// when the quantile roles are missing or left over from another run.
    fn load_for_inference(&self, property_type: PropertyType) -> Result<LoadedModels> {
        match self.load_triplet(property_type) {
            Ok(triplet) => Ok(LoadedModels::Triplet(triplet)),
            Err(EngineError::PartialTriplet { present, .. }) => {
                let point = self.load(property_type, ModelRole::Point)?;
                tracing::warn!(
                    property_type = %property_type,
                    present = ?present,
                    "incomplete model triplet, falling back to point model"
                );
                Ok(LoadedModels::PointOnly(point))
            }
            Err(EngineError::MixedTriplet { detail, .. }) => {
                let point = self.load(property_type, ModelRole::Point)?;
                tracing::warn!(
                    property_type = %property_type,
                    %detail,
                    "quantile models belong to another training run, using point model only"
                );
                Ok(LoadedModels::PointOnly(point))
            }
            Err(e) => Err(e),
        }
    }

    /// Save the three roles in order point, low, high.
    fn save_triplet(&self, triplet: &ModelTriplet) -> Result<Vec<ModelHandle>> {
        ModelRole::ALL
            .into_iter()
            .map(|role| self.save(triplet.property_type(), role, triplet.get(role)))
            .collect()
    }
}

/// A model may only be stored under its own key.
pub(crate) fn check_key(
    property_type: PropertyType,
    role: ModelRole,
    model: &EnsembleModel,
) -> Result<()> {
    if model.property_type != property_type || model.role != role {
        return Err(EngineError::SchemaMismatch {
            property_type,
            detail: format!(
                "cannot store a {} {} model as {property_type} {role}",
                model.property_type, model.role
            ),
        });
    }
    Ok(())
}
