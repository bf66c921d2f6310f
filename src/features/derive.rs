//! Derived model inputs computed from validated slot values.
//!
//! Derivations only read input slots, so the order they run in never changes
//! a result. Values are not range-checked; the input slots already were.

use crate::domain::{Derivation, FeatureSchema, GeoPoint};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (to.longitude - from.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Computes every derived feature of `schema` from `inputs`, which must hold
/// one value per input slot in declaration order.
///
/// Slot lookups cannot fail for a schema that passed `validate`; an unknown
/// name reads as 0.
pub fn derive(schema: &FeatureSchema, inputs: &[f64]) -> Vec<f64> {
    debug_assert_eq!(inputs.len(), schema.slots.len());
    let get = |name: &str| {
        schema
            .slots
            .iter()
            .position(|s| s.name == name)
            .map_or(0.0, |i| inputs[i])
    };

    schema
        .derived
        .iter()
        .map(|feature| match &feature.rule {
            Derivation::Age {
                slot,
                reference_year,
            } => (f64::from(*reference_year) - get(slot)).max(0.0),
            Derivation::Sum { slots } => slots.iter().map(|s| get(s)).sum(),
            Derivation::Ratio {
                numerator,
                denominator,
                min_denominator,
            } => get(numerator) / get(denominator).max(*min_denominator),
            Derivation::Distance {
                latitude,
                longitude,
                to,
            } => haversine_km(GeoPoint::new(get(latitude), get(longitude)), *to),
            Derivation::Score { terms } => terms
                .iter()
                .map(|t| {
                    let v = get(&t.slot);
                    let v = match (t.invert, schema.slot(&t.slot)) {
                        (true, Some(slot)) => slot.min + slot.max - v,
                        _ => v,
                    };
                    t.weight * v
                })
                .sum(),
            Derivation::Complement { slot, from } => from - get(slot),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DerivedFeature, FeatureKind, FeatureSlot, LANDMARKS, ScoreTerm};

    fn landmark(name: &str) -> GeoPoint {
        LANDMARKS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| *p)
            .unwrap()
    }

    fn rooms_schema() -> FeatureSchema {
        FeatureSchema::new(
            1,
            vec![
                FeatureSlot::new("square_feet", FeatureKind::Continuous, 300.0, 20_000.0),
                FeatureSlot::new("bedrooms", FeatureKind::Count, 0.0, 12.0),
                FeatureSlot::new("bathrooms", FeatureKind::Continuous, 0.0, 12.0),
                FeatureSlot::new("year_built", FeatureKind::Count, 1850.0, 2035.0),
            ],
        )
        .with_derived(vec![
            DerivedFeature::new("bed_bath_ratio", Derivation::ratio("bedrooms", "bathrooms")),
            DerivedFeature::new("living_area_ratio", Derivation::ratio("square_feet", "bedrooms")),
            DerivedFeature::new("total_rooms", Derivation::sum(&["bedrooms", "bathrooms"])),
            DerivedFeature::new("property_age", Derivation::age("year_built", 2026)),
        ])
    }

    #[test]
    fn haversine_matches_known_distances() {
        let here = GeoPoint::new(36.1699, -115.1398);
        assert_eq!(haversine_km(here, here), 0.0);

        // One degree of latitude along a meridian.
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111.195).abs() < 1e-3, "{d}");

        // Antipodes sit half a circumference apart.
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);

        let strip = landmark("distance_to_strip");
        let downtown = landmark("distance_to_downtown");
        let d = haversine_km(strip, downtown);
        assert!((d - 6.816).abs() < 1e-3, "strip to downtown: {d}");
        assert_eq!(d, haversine_km(downtown, strip));
    }

    #[test]
    fn ratios_floor_zero_denominators() {
        let schema = rooms_schema();

        // Studio with no bathroom: both ratios fall back to the numerator.
        let out = derive(&schema, &[450.0, 0.0, 0.0, 1990.0]);
        assert_eq!(out, vec![0.0, 450.0, 0.0, 36.0]);
        assert!(out.iter().all(|v| v.is_finite()));

        let out = derive(&schema, &[2400.0, 4.0, 2.5, 2005.0]);
        assert_eq!(out, vec![1.6, 600.0, 6.5, 21.0]);

        // Half a bathroom is floored too.
        let out = derive(&schema, &[900.0, 1.0, 0.5, 1990.0]);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn future_construction_has_age_zero() {
        let out = derive(&rooms_schema(), &[1800.0, 3.0, 2.0, 2030.0]);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn scores_invert_against_the_slot_range() {
        let schema = FeatureSchema::new(
            1,
            vec![
                FeatureSlot::new("school_rating", FeatureKind::Ordinal, 0.0, 10.0),
                FeatureSlot::new("crime_score", FeatureKind::Ordinal, 0.0, 10.0),
                FeatureSlot::new("walkability_score", FeatureKind::Ordinal, 0.0, 10.0),
                FeatureSlot::new("mortgage_rate_30yr", FeatureKind::Continuous, 0.0, 20.0),
            ],
        )
        .with_derived(vec![
            DerivedFeature::new(
                "neighborhood_quality",
                Derivation::Score {
                    terms: vec![
                        ScoreTerm::new("school_rating", 0.4),
                        ScoreTerm::new("crime_score", 0.4).inverted(),
                        ScoreTerm::new("walkability_score", 0.2),
                    ],
                },
            ),
            DerivedFeature::new(
                "affordability_index",
                Derivation::complement("mortgage_rate_30yr", 10.0),
            ),
        ]);
        let out = derive(&schema, &[8.0, 3.0, 5.0, 6.5]);
        assert!((out[0] - (3.2 + 2.8 + 1.0)).abs() < 1e-12);
        assert!((out[1] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn default_schema_distances_are_measured_from_the_property() {
        let schema = FeatureSchema::default_for(crate::domain::PropertyType::Condo);
        let downtown = landmark("distance_to_downtown");
        let inputs: Vec<f64> = schema
            .slots
            .iter()
            .map(|s| match s.name.as_str() {
                "latitude" => downtown.latitude,
                "longitude" => downtown.longitude,
                _ => s.min,
            })
            .collect();
        let out = derive(&schema, &inputs);
        let at = |name: &str| out[schema.position(name).unwrap() - schema.slots.len()];
        assert_eq!(at("distance_to_downtown"), 0.0);
        assert!((at("distance_to_airport") - 9.633).abs() < 1e-3);
    }
}
