//! Additive attributions for point estimates.
//!
//! Contributions come from exact path-dependent TreeSHAP over the point
//! ensemble, so `baseline + Σ contributions` reproduces the point estimate up
//! to floating-point error.

use crate::domain::{Explanation, FeatureContribution, FeatureVector};
use crate::error::{EngineError, Result};
use crate::models::EnsembleModel;

/// Largest tolerated gap between `baseline + Σ contributions` and the estimate,
/// relative to the estimate's magnitude.
const LOCAL_ACCURACY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default)]
pub struct Attributor;

impl Attributor {
    pub fn new() -> Self {
        Self
    }

    /// Break the point estimate for `vector` into per-feature contributions.
    ///
    /// Contributions are ranked by absolute size (largest first); equal
    /// magnitudes keep schema order.
    pub fn explain(&self, model: &EnsembleModel, vector: &FeatureVector) -> Result<Explanation> {
        let point = model.predict(vector)?;
        let phi = model.contributions(vector)?;

        let total = model.baseline + phi.iter().sum::<f64>();
        let gap = (total - point).abs();
        if gap > LOCAL_ACCURACY_TOLERANCE * point.abs().max(1.0) {
            tracing::warn!(
                property_type = %model.property_type,
                point,
                reconstructed = total,
                "attributions do not add up to the point estimate"
            );
        }

        let mut order: Vec<usize> = (0..phi.len()).collect();
        order.sort_by(|&a, &b| phi[b].abs().total_cmp(&phi[a].abs()).then(a.cmp(&b)));

        let contributions = order
            .into_iter()
            .enumerate()
            .map(|(rank, i)| FeatureContribution {
                feature: vector.names()[i].clone(),
                value: vector.values()[i],
                contribution: phi[i],
                rank: rank + 1,
            })
            .collect();

        Ok(Explanation {
            property_type: model.property_type,
            baseline: model.baseline,
            point_estimate: point,
            contributions,
        })
    }

    /// Mean absolute attribution per feature over the training set, largest first.
    pub fn global_importance(&self, model: &EnsembleModel) -> Result<Vec<(String, f64)>> {
        let importance = model
            .importance
            .as_ref()
            .filter(|v| v.len() == model.schema.len())
            .ok_or(EngineError::ImportanceUnavailable {
                property_type: model.property_type,
            })?;

        let mut ranked: Vec<(String, f64)> =
            model.schema.names().into_iter().zip(importance.iter().copied()).collect();
        // Stable sort keeps declaration order among ties.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        FeatureKind, FeatureSchema, FeatureSlot, ModelRole, PropertyType, RawFeatures,
    };
    use crate::features::FeatureVectorBuilder;
    use crate::models::ensemble::test_support::toy_model;

    const PT: PropertyType = PropertyType::SingleFamily;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(
            1,
            vec![
                FeatureSlot::new("square_feet", FeatureKind::Continuous, 0.0, 100.0),
                FeatureSlot::new("bedrooms", FeatureKind::Count, 0.0, 100.0),
                FeatureSlot::new("pool", FeatureKind::Binary, 0.0, 1.0),
            ],
        )
    }

    fn vector(schema: &FeatureSchema, sqft: f64, beds: f64) -> FeatureVector {
        let raw: RawFeatures = [
            ("square_feet".to_string(), sqft.into()),
            ("bedrooms".to_string(), beds.into()),
            ("pool".to_string(), false.into()),
        ]
        .into_iter()
        .collect();
        FeatureVectorBuilder::new(PT, schema).build(&raw).unwrap()
    }

    #[test]
    fn contributions_add_up_to_the_estimate() {
        let schema = schema();
        let model = toy_model(PT, ModelRole::Point, schema.clone());
        for (sqft, beds) in [(3.0, 4.0), (12.0, 1.0), (19.0, 19.0)] {
            let e = Attributor::new().explain(&model, &vector(&schema, sqft, beds)).unwrap();
            let total = e.baseline + e.total_contribution();
            assert!((total - e.point_estimate).abs() < 1e-6, "{total} vs {}", e.point_estimate);
        }
    }

    #[test]
    fn ranks_are_one_based_and_ordered_by_magnitude() {
        let schema = schema();
        let model = toy_model(PT, ModelRole::Point, schema.clone());
        let e = Attributor::new().explain(&model, &vector(&schema, 15.0, 2.0)).unwrap();
        assert_eq!(e.contributions.len(), 3);
        assert_eq!(
            e.contributions.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for w in e.contributions.windows(2) {
            assert!(w[0].contribution.abs() >= w[1].contribution.abs());
        }
    }

    #[test]
    fn equal_magnitudes_keep_schema_order() {
        let schema = schema();
        let model = toy_model(PT, ModelRole::Point, schema.clone());
        let e = Attributor::new().explain(&model, &vector(&schema, 5.0, 5.0)).unwrap();
        let zeros: Vec<&str> = e
            .contributions
            .iter()
            .filter(|c| c.contribution == 0.0)
            .map(|c| c.feature.as_str())
            .collect();
        let mut sorted = zeros.clone();
        sorted.sort_by_key(|n| schema.position(n));
        assert_eq!(zeros, sorted);
    }

    #[test]
    fn importance_is_sorted_descending() {
        let schema = schema();
        let mut model = toy_model(PT, ModelRole::Point, schema);
        model.importance = Some(vec![1.0, 5.0, 1.0]);
        let ranked = Attributor::new().global_importance(&model).unwrap();
        let names: Vec<&str> = ranked.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bedrooms", "square_feet", "pool"]);
    }

    #[test]
    fn missing_importance_is_reported() {
        let model = toy_model(PT, ModelRole::Point, schema());
        assert!(matches!(
            Attributor::new().global_importance(&model),
            Err(EngineError::ImportanceUnavailable { .. })
        ));
    }

    #[test]
    fn foreign_vectors_are_rejected() {
        let schema = schema();
        let model = toy_model(PropertyType::Condo, ModelRole::Point, schema.clone());
        assert!(matches!(
            Attributor::new().explain(&model, &vector(&schema, 1.0, 1.0)),
            Err(EngineError::SchemaMismatch { .. })
        ));
    }
}
