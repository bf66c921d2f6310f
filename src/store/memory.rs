//! In-process model store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::{ModelRole, PropertyType};
use crate::error::{EngineError, Result};
use crate::models::EnsembleModel;
use crate::store::{ModelHandle, ModelStore, check_key};

type Slot = (PropertyType, ModelRole);

/// Publishing a model is a single map insert under the write lock.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<Slot, Arc<EnsembleModel>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one role, e.g. to simulate an interrupted deployment.
    pub fn remove(&self, property_type: PropertyType, role: ModelRole) -> bool {
        let mut guard = self.models.write().unwrap_or_else(|p| p.into_inner());
        guard.remove(&(property_type, role)).is_some()
    }

    pub fn len(&self) -> usize {
        self.models.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelStore for MemoryModelStore {
    fn save(
        &self,
        property_type: PropertyType,
        role: ModelRole,
        model: &EnsembleModel,
    ) -> Result<ModelHandle> {
        check_key(property_type, role, model)?;
        let shared = Arc::new(model.clone());
        {
            // A poisoned lock still guards a consistent map: inserts are single operations.
            let mut guard = self.models.write().unwrap_or_else(|p| p.into_inner());
            guard.insert((property_type, role), shared);
        }
        tracing::debug!(property_type = %property_type, role = %role, "stored model in memory");
        Ok(ModelHandle {
            property_type,
            role,
            version: model.version(),
            location: format!("memory://{property_type}/{role}"),
        })
    }

    fn load(&self, property_type: PropertyType, role: ModelRole) -> Result<EnsembleModel> {
        let guard = self.models.read().unwrap_or_else(|p| p.into_inner());
        guard
            .get(&(property_type, role))
            .map(|m| EnsembleModel::clone(m))
            .ok_or(EngineError::NotFound { property_type, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureSchema;
    use crate::models::LoadedModels;
    use crate::models::ensemble::test_support::toy_model;

    #[test]
    fn full_triplet_loads_as_triplet() {
        let store = MemoryModelStore::new();
        let pt = PropertyType::Townhouse;
        for role in ModelRole::ALL {
            store.save(pt, role, &toy_model(pt, role, FeatureSchema::default_for(pt))).unwrap();
        }
        assert_eq!(store.len(), 3);
        let loaded = store.load_for_inference(pt).unwrap();
        assert!(loaded.is_triplet());

        store.remove(pt, ModelRole::QuantileHigh);
        assert!(matches!(store.load_for_inference(pt).unwrap(), LoadedModels::PointOnly(_)));
    }

    #[test]
    fn schema_disagreement_is_detected() {
        let store = MemoryModelStore::new();
        let pt = PropertyType::Condo;
        let mut v2 = FeatureSchema::default_for(pt);
        v2.version = 2;
        let v1 = FeatureSchema::default_for(pt);
        for (role, schema) in [
            (ModelRole::Point, v1),
            (ModelRole::QuantileLow, v2.clone()),
            (ModelRole::QuantileHigh, v2),
        ] {
            store.save(pt, role, &toy_model(pt, role, schema)).unwrap();
        }
        assert!(matches!(store.load_triplet(pt), Err(EngineError::SchemaMismatch { .. })));
    }

    #[test]
    fn roles_from_another_run_are_not_served_as_a_triplet() {
        let store = MemoryModelStore::new();
        let pt = PropertyType::SingleFamily;
        let schema = FeatureSchema::default_for(pt);
        for role in ModelRole::ALL {
            store.save(pt, role, &toy_model(pt, role, schema.clone())).unwrap();
        }

        // A later run that only got as far as the point model.
        let mut newer = toy_model(pt, ModelRole::Point, schema);
        newer.trained_at += chrono::Duration::days(30);
        store.save(pt, ModelRole::Point, &newer).unwrap();

        assert!(matches!(store.load_triplet(pt), Err(EngineError::MixedTriplet { .. })));
        match store.load_for_inference(pt).unwrap() {
            LoadedModels::PointOnly(m) => assert_eq!(m.trained_at, newer.trained_at),
            other => panic!("expected the point model alone, got {other:?}"),
        }
    }
}
