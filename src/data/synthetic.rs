//! Synthetic county sales generation.
//!
//! Used by tests, demos and the `synth` command. Feature values are drawn per
//! slot (known county features get realistic ranges, anything else a uniform
//! draw inside its schema bounds) and prices follow a linear hedonic formula
//! plus Gaussian noise, floored at a minimum sale price.

use std::collections::HashMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    FeatureKind, FeatureSchema, FeatureSlot, GeoPoint, LANDMARKS, PropertyType, RawFeatures,
    RawValue, TrainingSample,
};
use crate::error::{EngineError, Result};
use crate::features::{FeatureVectorBuilder, UnknownKeyPolicy, haversine_km};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub count: usize,
    pub seed: u64,
    /// Standard deviation of the price noise.
    pub noise_sd: f64,
    pub price_floor: f64,
}

impl SyntheticConfig {
    pub fn new(count: usize, seed: u64) -> Self {
        Self {
            count,
            seed,
            noise_sd: 50_000.0,
            price_floor: 100_000.0,
        }
    }
}

/// One generated sale before schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSale {
    pub raw: RawFeatures,
    pub sale_price: f64,
}

/// Generate raw feature mappings and prices.
pub fn generate_raw_sales(
    property_type: PropertyType,
    schema: &FeatureSchema,
    config: &SyntheticConfig,
) -> Result<Vec<SyntheticSale>> {
    if config.count == 0 {
        return Err(EngineError::InvalidTrainingData("sample count must be > 0".to_string()));
    }
    if !(config.price_floor.is_finite() && config.price_floor > 0.0) {
        return Err(EngineError::InvalidTrainingData("price floor must be positive".to_string()));
    }
    let noise = Normal::new(0.0, config.noise_sd).map_err(|e| {
        EngineError::InvalidTrainingData(format!("noise distribution error: {e}"))
    })?;

    let salt = PropertyType::ALL
        .iter()
        .position(|&p| p == property_type)
        .unwrap_or(0) as u64;
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(salt.wrapping_mul(1_000_003)));

    let mut out = Vec::with_capacity(config.count);
    for _ in 0..config.count {
        let mut raw = RawFeatures::new();
        let mut value_of = HashMap::new();
        for slot in &schema.slots {
            let v = draw(&mut rng, property_type, slot);
            value_of.insert(slot.name.as_str(), v);
            let raw_value = match slot.kind {
                FeatureKind::Binary => RawValue::Bool(v >= 0.5),
                _ => RawValue::Number(v),
            };
            raw.insert(slot.name.clone(), raw_value);
        }

        let get = |name: &str| match name {
            "distance_to_downtown" => downtown_km(&value_of),
            _ => value_of.get(name).copied().unwrap_or(0.0),
        };
        let price = hedonic_price(property_type, &get) + noise.sample(&mut rng);
        out.push(SyntheticSale {
            raw,
            sale_price: price.max(config.price_floor),
        });
    }
    Ok(out)
}

/// Generate validated training samples.
pub fn generate_sales(
    property_type: PropertyType,
    schema: &FeatureSchema,
    config: &SyntheticConfig,
) -> Result<Vec<TrainingSample>> {
    let builder = FeatureVectorBuilder::new(property_type, schema)
        .with_unknown_policy(UnknownKeyPolicy::Strict);
    generate_raw_sales(property_type, schema, config)?
        .into_iter()
        .map(|sale| -> Result<TrainingSample> {
            Ok(TrainingSample::new(builder.build(&sale.raw)?, sale.sale_price))
        })
        .collect()
}

fn uniform(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

fn whole(rng: &mut StdRng, lo: i64, hi: i64) -> f64 {
    if hi > lo { rng.gen_range(lo..=hi) as f64 } else { lo as f64 }
}

fn draw(rng: &mut StdRng, property_type: PropertyType, slot: &FeatureSlot) -> f64 {
    let condo = property_type == PropertyType::Condo;
    let v = match slot.name.as_str() {
        "square_feet" if condo => whole(rng, 500, 2_500),
        "square_feet" => whole(rng, 800, 4_000),
        "bedrooms" if condo => whole(rng, 1, 3),
        "bedrooms" => whole(rng, 1, 5),
        "bathrooms" => (uniform(rng, 1.0, 4.0) * 2.0).round() / 2.0,
        "year_built" => whole(rng, 1950, 2023),
        "lot_size" if property_type == PropertyType::Townhouse => whole(rng, 1_000, 5_000),
        "lot_size" => whole(rng, 2_000, 20_000),
        "stories" => whole(rng, 1, 3),
        "garage_spaces" => whole(rng, 0, 3),
        "pool" => f64::from(u8::from(rng.gen_bool(0.25))),
        "has_view" => f64::from(u8::from(rng.gen_bool(0.3))),
        "floor_level" => whole(rng, 1, 30),
        "hoa_fee" => (uniform(rng, 100.0, 800.0)).round(),
        "quality_score" => whole(rng, 3, 10),
        "school_rating" | "crime_score" | "walkability_score" => whole(rng, 1, 10),
        // Las Vegas valley.
        "latitude" => (uniform(rng, 35.95, 36.35) * 10_000.0).round() / 10_000.0,
        "longitude" => (uniform(rng, -115.35, -114.95) * 10_000.0).round() / 10_000.0,
        "median_income" => whole(rng, 35_000, 150_000),
        "mortgage_rate_30yr" => (uniform(rng, 3.0, 7.0) * 100.0).round() / 100.0,
        "unemployment_rate" => (uniform(rng, 3.0, 8.0) * 10.0).round() / 10.0,
        _ => match slot.kind {
            FeatureKind::Binary => f64::from(u8::from(rng.gen_bool(0.5))),
            FeatureKind::Count | FeatureKind::Ordinal => {
                whole(rng, slot.min.ceil() as i64, slot.max.floor() as i64)
            }
            FeatureKind::Continuous => uniform(rng, slot.min, slot.max),
        },
    };
    v.clamp(slot.min, slot.max)
}

/// Distance from the drawn coordinates to downtown; 0 when the schema has none.
fn downtown_km(value_of: &HashMap<&str, f64>) -> f64 {
    let coordinates = (value_of.get("latitude"), value_of.get("longitude"));
    let (Some(&latitude), Some(&longitude)) = coordinates else {
        return 0.0;
    };
    LANDMARKS
        .iter()
        .find(|(name, _)| *name == "distance_to_downtown")
        .map_or(0.0, |(_, to)| haversine_km(GeoPoint::new(latitude, longitude), *to))
}

fn hedonic_price(property_type: PropertyType, get: &dyn Fn(&str) -> f64) -> f64 {
    let base = 100_000.0
        + get("bedrooms") * 25_000.0
        + get("bathrooms") * 15_000.0
        + get("square_feet") * 100.0
        - (2023.0 - get("year_built")).max(0.0) * 500.0
        + get("school_rating") * 10_000.0
        + (10.0 - get("crime_score")) * 5_000.0
        + get("walkability_score") * 2_000.0
        + get("quality_score") * 8_000.0
        - get("distance_to_downtown") * 1_500.0
        + get("median_income") * 0.5
        - (get("mortgage_rate_30yr") - 5.0) * 10_000.0
        - get("unemployment_rate") * 2_000.0;

    let type_specific = match property_type {
        PropertyType::SingleFamily => {
            get("lot_size") * 2.0
                + get("garage_spaces") * 7_500.0
                + get("pool") * 20_000.0
                + get("stories") * 5_000.0
        }
        PropertyType::Condo => {
            get("floor_level") * 1_500.0 + get("has_view") * 30_000.0 - get("hoa_fee") * 60.0
        }
        PropertyType::Townhouse => {
            get("lot_size") * 3.0 + get("garage_spaces") * 6_000.0 - get("hoa_fee") * 40.0
                + get("stories") * 4_000.0
        }
    };

    let multiplier = match property_type {
        PropertyType::SingleFamily => 1.0,
        PropertyType::Condo => 0.8,
        PropertyType::Townhouse => 0.9,
    };
    (base + type_specific) * multiplier
}
