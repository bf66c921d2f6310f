//! Valuation engine facade.
//!
//! Binds the configuration to a model store and exposes every operation keyed
//! by property type. Models are loaded from the store on each call; the engine
//! keeps no model cache of its own.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{EngineConfig, PropertyTypeSettings};
use crate::domain::{
    Explanation, FeatureVector, ModelRole, PropertyType, RawFeatures, TrainingSample,
    ValuationResult,
};
use crate::error::{EngineError, Result};
use crate::explain::Attributor;
use crate::features::FeatureVectorBuilder;
use crate::fit::{
    CancelToken, HyperparameterGrid, TrainedTriplet, Trainer, TrainingJob, TrainingReport,
};
use crate::math::RegressionMetrics;
use crate::models::{EnsembleModel, LoadedModels};
use crate::predict::Predictor;
use crate::store::{FileModelStore, ModelHandle, ModelStore};

/// A trained triplet after it was published to the store.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedTraining {
    pub handles: Vec<ModelHandle>,
    pub report: TrainingReport,
}

pub struct ValuationEngine<S: ModelStore> {
    config: EngineConfig,
    store: S,
    trainer: Trainer,
    predictor: Predictor,
    attributor: Attributor,
}

impl ValuationEngine<FileModelStore> {
    /// Engine backed by a file store at `storage.model_dir`, using each
    /// property type's configured storage key.
    pub fn with_file_store(config: EngineConfig) -> Self {
        let store = PropertyType::ALL.into_iter().fold(
            FileModelStore::new(&config.storage.model_dir),
            |store, pt| store.with_storage_key(pt, config.property_type(pt).storage_key.clone()),
        );
        Self::new(config, store)
    }
}

impl<S: ModelStore> ValuationEngine<S> {
    /// `config` is expected to be validated already (`ConfigLoader` does this).
    pub fn new(config: EngineConfig, store: S) -> Self {
        let trainer = Trainer::new(config.training.clone());
        let predictor =
            Predictor::new(config.prediction.clone()).with_tail_split(config.training.tail_split);
        Self {
            config,
            store,
            trainer,
            predictor,
            attributor: Attributor::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn settings(&self, property_type: PropertyType) -> &PropertyTypeSettings {
        self.config.property_type(property_type)
    }

    /// Validate a raw mapping against the property type's schema.
    pub fn build_vector(
        &self,
        property_type: PropertyType,
        raw: &RawFeatures,
    ) -> Result<FeatureVector> {
        let settings = self.settings(property_type);
        let vector = FeatureVectorBuilder::new(property_type, &settings.schema)
            .with_unknown_policy(settings.unknown_keys)
            .build(raw)?;
        Ok(vector)
    }

    /// Train a triplet with the configured hyperparameters. Nothing is stored.
    pub fn train(
        &self,
        property_type: PropertyType,
        samples: &[TrainingSample],
    ) -> Result<TrainedTriplet> {
        let settings = self.settings(property_type);
        self.trainer
            .train(property_type, &settings.schema, samples, &settings.hyperparameters)
    }

    /// Train with the configured hyperparameters and publish the triplet.
    pub fn train_and_save(
        &self,
        property_type: PropertyType,
        samples: &[TrainingSample],
    ) -> Result<PublishedTraining> {
        let trained = self.train(property_type, samples)?;
        self.publish(trained)
    }

    /// Grid-search the hyperparameters (configured grid when `grid` is `None`),
    /// then train the triplet with the winner. Nothing is stored.
    pub fn search_and_train(
        &self,
        property_type: PropertyType,
        samples: &[TrainingSample],
        grid: Option<&HyperparameterGrid>,
        cancel: &CancelToken,
    ) -> Result<TrainedTriplet> {
        let settings = self.settings(property_type);
        let grid = grid.cloned().unwrap_or_else(|| settings.grid());
        self.trainer.train_with_search(
            property_type,
            &settings.schema,
            samples,
            &grid,
            &settings.hyperparameters,
            cancel,
        )
    }

    /// Save all three roles of a trained triplet.
    pub fn publish(&self, trained: TrainedTriplet) -> Result<PublishedTraining> {
        let handles = self.store.save_triplet(&trained.triplet)?;
        Ok(PublishedTraining {
            handles,
            report: trained.report,
        })
    }

    /// Train and publish every property type in `sets` concurrently.
    ///
    /// Each type succeeds or fails on its own; a failed type leaves its
    /// previously stored models in place.
    pub fn train_all(
        &self,
        sets: &BTreeMap<PropertyType, Vec<TrainingSample>>,
        cancel: &CancelToken,
    ) -> Vec<(PropertyType, Result<PublishedTraining>)> {
        let jobs: Vec<TrainingJob<'_>> = sets
            .iter()
            .map(|(&property_type, samples)| {
                let settings = self.settings(property_type);
                TrainingJob {
                    property_type,
                    schema: &settings.schema,
                    samples,
                    hyperparameters: &settings.hyperparameters,
                }
            })
            .collect();

        self.trainer
            .train_all(&jobs, cancel)
            .into_iter()
            .map(|(pt, result)| (pt, result.and_then(|trained| self.publish(trained))))
            .collect()
    }

    /// Models available for valuing this property type.
    pub fn models(&self, property_type: PropertyType) -> Result<LoadedModels> {
        self.store.load_for_inference(property_type)
    }

    pub fn predict(
        &self,
        property_type: PropertyType,
        vector: &FeatureVector,
        confidence_level: f64,
    ) -> Result<ValuationResult> {
        let models = self.models(property_type)?;
        self.predictor.predict(&models, vector, confidence_level)
    }

    /// Like [`predict`](Self::predict) with a fixed RNG seed for the fallback interval.
    pub fn predict_seeded(
        &self,
        property_type: PropertyType,
        vector: &FeatureVector,
        confidence_level: f64,
        seed: u64,
    ) -> Result<ValuationResult> {
        let models = self.models(property_type)?;
        self.predictor.predict_seeded(&models, vector, confidence_level, seed)
    }

    /// Value a batch; models are loaded once and every item is independent.
    pub fn predict_many(
        &self,
        property_type: PropertyType,
        vectors: &[FeatureVector],
        confidence_level: f64,
    ) -> Result<Vec<Result<ValuationResult>>> {
        let models = self.models(property_type)?;
        Ok(self.predictor.predict_many(&models, vectors, confidence_level))
    }

    /// Build the vector and value it in one step.
    pub fn value(
        &self,
        property_type: PropertyType,
        raw: &RawFeatures,
        confidence_level: f64,
    ) -> Result<ValuationResult> {
        let vector = self.build_vector(property_type, raw)?;
        self.predict(property_type, &vector, confidence_level)
    }

    fn point_model(&self, property_type: PropertyType) -> Result<EnsembleModel> {
        match self.store.load(property_type, ModelRole::Point) {
            Err(EngineError::NotFound { .. }) => {
                Err(EngineError::ModelNotTrained { property_type })
            }
            other => other,
        }
    }

    pub fn explain(
        &self,
        property_type: PropertyType,
        vector: &FeatureVector,
    ) -> Result<Explanation> {
        let model = self.point_model(property_type)?;
        self.attributor.explain(&model, vector)
    }

    /// Features ranked by mean absolute attribution over the training set.
    pub fn global_importance(&self, property_type: PropertyType) -> Result<Vec<(String, f64)>> {
        let model = self.point_model(property_type)?;
        self.attributor.global_importance(&model)
    }

    /// Accuracy of the stored point model on held-out sales.
    pub fn evaluate(
        &self,
        property_type: PropertyType,
        samples: &[TrainingSample],
    ) -> Result<RegressionMetrics> {
        let model = self.point_model(property_type)?;
        let mut observed = Vec::with_capacity(samples.len());
        let mut predicted = Vec::with_capacity(samples.len());
        for s in samples {
            predicted.push(model.predict(&s.features)?);
            observed.push(s.sale_price);
        }
        let metrics = RegressionMetrics::compute(&observed, &predicted).ok_or_else(|| {
            EngineError::InvalidTrainingData("evaluation set is empty".to_string())
        })?;
        tracing::info!(
            property_type = %property_type,
            n = metrics.n,
            rmse = metrics.rmse,
            r2 = metrics.r2,
            "evaluated point model"
        );
        Ok(metrics)
    }
}
