//! End-to-end acceptance scenarios.

use home_valuer::data::{SyntheticConfig, generate_sales};
use home_valuer::domain::{
    FeatureKind, FeatureSchema, FeatureSlot, Hyperparameters, IntervalMethod, ModelRole,
    PropertyType, RawFeatures, RawValue, TrainingSample,
};
use home_valuer::error::{EngineError, ValidationError};
use home_valuer::features::FeatureVectorBuilder;
use home_valuer::fit::{Trainer, TrainerConfig};
use home_valuer::models::LoadedModels;
use home_valuer::predict::{Predictor, PredictorConfig};
use home_valuer::store::{FileModelStore, ModelStore};

fn sqft_schema(version: u32) -> FeatureSchema {
    FeatureSchema::new(
        version,
        vec![
            FeatureSlot::new("sqft", FeatureKind::Continuous, 500.0, 10_000.0),
            FeatureSlot::new("bedrooms", FeatureKind::Count, 1.0, 10.0),
        ],
    )
}

fn raw(pairs: &[(&str, f64)]) -> RawFeatures {
    pairs.iter().map(|(k, v)| (k.to_string(), RawValue::Number(*v))).collect()
}

fn quick() -> Hyperparameters {
    Hyperparameters {
        n_estimators: 40,
        max_depth: 3,
        ..Hyperparameters::default()
    }
}

#[test]
fn scenario_a_builder_accepts_complete_mappings_only() {
    let schema = sqft_schema(1);
    let builder = FeatureVectorBuilder::new(PropertyType::SingleFamily, &schema);

    let v = builder.build(&raw(&[("sqft", 2000.0), ("bedrooms", 3.0)])).unwrap();
    assert_eq!(v.values(), &[2000.0, 3.0]);
    assert!(v.clamped.is_empty());

    let err = builder.build(&raw(&[("sqft", 2000.0)])).unwrap_err();
    assert_eq!(
        err,
        ValidationError::MissingFeature {
            feature: "bedrooms".to_string()
        }
    );
}

#[test]
fn scenario_b_sixty_sales_train_a_consistent_triplet() {
    let pt = PropertyType::SingleFamily;
    let schema = FeatureSchema::default_for(pt);
    let samples = generate_sales(pt, &schema, &SyntheticConfig::new(60, 42)).unwrap();

    let trained = Trainer::default().train(pt, &schema, &samples, &quick()).unwrap();
    let t = &trained.triplet;
    assert_eq!(t.point.schema, schema);
    assert_eq!(t.quantile_low.schema, schema);
    assert_eq!(t.quantile_high.schema, schema);
    assert_eq!(t.point.role, ModelRole::Point);
    assert_eq!(t.quantile_low.role, ModelRole::QuantileLow);
    assert_eq!(t.quantile_high.role, ModelRole::QuantileHigh);
    assert_eq!(trained.report.samples, 60);
}

#[test]
fn scenario_c_ten_sales_are_not_enough() {
    let pt = PropertyType::SingleFamily;
    let schema = FeatureSchema::default_for(pt);
    let samples = generate_sales(pt, &schema, &SyntheticConfig::new(10, 1)).unwrap();

    let err = Trainer::default().train(pt, &schema, &samples, &quick()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientData {
            required: 50,
            actual: 10,
            ..
        }
    ));
}

#[test]
fn scenario_d_point_only_store_uses_the_bootstrap() {
    let pt = PropertyType::Condo;
    let schema = FeatureSchema::default_for(pt);
    let samples = generate_sales(pt, &schema, &SyntheticConfig::new(80, 7)).unwrap();
    let trained = Trainer::new(TrainerConfig::default())
        .train(pt, &schema, &samples, &quick())
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = FileModelStore::new(dir.path());
    store.save(pt, ModelRole::Point, &trained.triplet.point).unwrap();

    let models = store.load_for_inference(pt).unwrap();
    assert!(!models.is_triplet());

    let predictor = Predictor::new(PredictorConfig {
        seed: Some(42),
        ..PredictorConfig::default()
    });
    let result = predictor.predict(&models, &samples[0].features, 0.9).unwrap();
    assert_eq!(result.interval_method, IntervalMethod::Bootstrap);
    assert!(result.interval_low < result.interval_high);
    assert!(result.interval_low <= result.point_estimate);
    assert!(result.point_estimate <= result.interval_high);
}

#[test]
fn scenario_e_schema_version_mismatch_is_rejected() {
    let pt = PropertyType::Townhouse;
    let v1 = sqft_schema(1);
    let samples: Vec<_> = (0..60)
        .map(|i| {
            let sqft = 800.0 + 50.0 * i as f64;
            let beds = (1 + i % 5) as f64;
            let v = FeatureVectorBuilder::new(pt, &v1)
                .build(&raw(&[("sqft", sqft), ("bedrooms", beds)]))
                .unwrap();
            TrainingSample::new(v, 100_000.0 + 150.0 * sqft + 10_000.0 * beds)
        })
        .collect();
    let trained = Trainer::default().train(pt, &v1, &samples, &quick()).unwrap();
    let models: LoadedModels = trained.triplet.into();

    let v2 = sqft_schema(2);
    let vector = FeatureVectorBuilder::new(pt, &v2)
        .build(&raw(&[("sqft", 2000.0), ("bedrooms", 3.0)]))
        .unwrap();
    let err = Predictor::default().predict(&models, &vector, 0.9).unwrap_err();
    assert!(matches!(err, EngineError::SchemaMismatch { .. }));
}
