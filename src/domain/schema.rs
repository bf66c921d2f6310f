//! Feature schemas: the ordered slot lists each property type is valued on.
//!
//! A schema is fixed at configuration time. Its `version` is recorded with every
//! trained ensemble so that vectors and models built against different layouts
//! are rejected instead of silently misaligned.
//!
//! Callers supply the input `slots`. The `derived` features are computed from
//! them after validation and appended in declaration order, so a model's input
//! width is `slots.len() + derived.len()`.

use serde::{Deserialize, Serialize};

use crate::domain::{FeatureKind, PropertyType};

/// Year `property_age` is measured against in the built-in schemas.
pub const REFERENCE_YEAR: i32 = 2026;

/// Clark County landmarks the built-in schemas measure distances to.
pub const LANDMARKS: [(&str, GeoPoint); 3] = [
    ("distance_to_strip", GeoPoint::new(36.1147, -115.1728)),
    ("distance_to_airport", GeoPoint::new(36.0840, -115.1537)),
    ("distance_to_downtown", GeoPoint::new(36.1699, -115.1398)),
];

/// One named slot of a feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSlot {
    pub name: String,
    pub kind: FeatureKind,
    pub min: f64,
    pub max: f64,
    /// Clamp out-of-range values onto the nearest bound instead of rejecting them.
    #[serde(default)]
    pub clamp: bool,
}

impl FeatureSlot {
    pub fn new(name: &str, kind: FeatureKind, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            min,
            max,
            clamp: false,
        }
    }

    pub fn clamped(mut self) -> Self {
        self.clamp = true;
        self
    }

    fn binary(name: &str) -> Self {
        Self::new(name, FeatureKind::Binary, 0.0, 1.0)
    }

    fn ordinal(name: &str) -> Self {
        Self::new(name, FeatureKind::Ordinal, 0.0, 10.0)
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTerm {
    pub slot: String,
    pub weight: f64,
    /// Score the slot upside down (`min + max - value`), e.g. crime.
    #[serde(default)]
    pub invert: bool,
}

impl ScoreTerm {
    pub fn new(slot: &str, weight: f64) -> Self {
        Self {
            slot: slot.to_string(),
            weight,
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// How a derived feature is computed from input slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Years between `slot` and `reference_year`, never negative.
    Age { slot: String, reference_year: i32 },
    Sum { slots: Vec<String> },
    /// `numerator / max(denominator, min_denominator)`.
    Ratio {
        numerator: String,
        denominator: String,
        #[serde(default = "default_min_denominator")]
        min_denominator: f64,
    },
    /// Great-circle distance in kilometres from the slot coordinates to `to`.
    Distance {
        latitude: String,
        longitude: String,
        to: GeoPoint,
    },
    /// Weighted sum of slots.
    Score { terms: Vec<ScoreTerm> },
    /// `from - slot`.
    Complement { slot: String, from: f64 },
}

fn default_min_denominator() -> f64 {
    1.0
}

impl Derivation {
    pub fn age(slot: &str, reference_year: i32) -> Self {
        Derivation::Age {
            slot: slot.to_string(),
            reference_year,
        }
    }

    pub fn sum(slots: &[&str]) -> Self {
        Derivation::Sum {
            slots: slots.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Ratio with the default denominator floor of 1.
    pub fn ratio(numerator: &str, denominator: &str) -> Self {
        Derivation::Ratio {
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
            min_denominator: default_min_denominator(),
        }
    }

    pub fn distance(latitude: &str, longitude: &str, to: GeoPoint) -> Self {
        Derivation::Distance {
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            to,
        }
    }

    pub fn complement(slot: &str, from: f64) -> Self {
        Derivation::Complement {
            slot: slot.to_string(),
            from,
        }
    }

    /// Input slots the derivation reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Derivation::Age { slot, .. } | Derivation::Complement { slot, .. } => vec![slot],
            Derivation::Sum { slots } => slots.iter().map(String::as_str).collect(),
            Derivation::Ratio {
                numerator, denominator, ..
            } => vec![numerator, denominator],
            Derivation::Distance { latitude, longitude, .. } => vec![latitude, longitude],
            Derivation::Score { terms } => terms.iter().map(|t| t.slot.as_str()).collect(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Derivation::Sum { slots } if slots.is_empty() => {
                Err("sum needs at least one slot".to_string())
            }
            Derivation::Score { terms } if terms.is_empty() => {
                Err("score needs at least one term".to_string())
            }
            Derivation::Score { terms } => match terms.iter().find(|t| !t.weight.is_finite()) {
                Some(t) => Err(format!("weight of '{}' must be finite", t.slot)),
                None => Ok(()),
            },
            Derivation::Ratio {
                min_denominator, ..
            } if !(min_denominator.is_finite() && *min_denominator > 0.0) => {
                Err(format!("min_denominator must be > 0, got {min_denominator}"))
            }
            Derivation::Distance { to, .. }
                if !((-90.0..=90.0).contains(&to.latitude)
                    && (-180.0..=180.0).contains(&to.longitude)) =>
            {
                Err(format!(
                    "target ({}, {}) is not a coordinate",
                    to.latitude, to.longitude
                ))
            }
            Derivation::Complement { from, .. } if !from.is_finite() => {
                Err("complement base must be finite".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// A model input computed from validated slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeature {
    pub name: String,
    pub rule: Derivation,
}

impl DerivedFeature {
    pub fn new(name: &str, rule: Derivation) -> Self {
        Self {
            name: name.to_string(),
            rule,
        }
    }
}

/// Ordered sequence of feature slots for one property type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub slots: Vec<FeatureSlot>,
    #[serde(default)]
    pub derived: Vec<DerivedFeature>,
}

impl FeatureSchema {
    pub fn new(version: u32, slots: Vec<FeatureSlot>) -> Self {
        Self {
            version,
            slots,
            derived: Vec::new(),
        }
    }

    pub fn with_derived(mut self, derived: Vec<DerivedFeature>) -> Self {
        self.derived = derived;
        self
    }

    /// Model input width: input slots plus derived features.
    pub fn len(&self) -> usize {
        self.slots.len() + self.derived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of a feature in the model input (slots first, then derived).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    /// The caller-supplied slot called `name`.
    pub fn slot(&self, name: &str) -> Option<&FeatureSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.name.clone())
            .chain(self.derived.iter().map(|d| d.name.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.slots.is_empty() {
            return Err("schema has no feature slots".to_string());
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.name.trim().is_empty() {
                return Err(format!("slot #{i} has an empty name"));
            }
            if self.slots[..i].iter().any(|s| s.name == slot.name) {
                return Err(format!("duplicate slot '{}'", slot.name));
            }
            if !(slot.min.is_finite() && slot.max.is_finite() && slot.min < slot.max) {
                return Err(format!(
                    "slot '{}' has an invalid range [{}, {}]",
                    slot.name, slot.min, slot.max
                ));
            }
            match slot.kind {
                FeatureKind::Ordinal if slot.min < 0.0 || slot.max > 10.0 => {
                    return Err(format!("ordinal slot '{}' must stay within 0..=10", slot.name));
                }
                FeatureKind::Binary if slot.min != 0.0 || slot.max != 1.0 => {
                    return Err(format!("binary slot '{}' must have range [0, 1]", slot.name));
                }
                FeatureKind::Count if slot.min < 0.0 => {
                    return Err(format!("count slot '{}' cannot go below 0", slot.name));
                }
                _ => {}
            }
        }
        for (i, feature) in self.derived.iter().enumerate() {
            if feature.name.trim().is_empty() {
                return Err(format!("derived feature #{i} has an empty name"));
            }
            let taken = self.slot(&feature.name).is_some()
                || self.derived[..i].iter().any(|d| d.name == feature.name);
            if taken {
                return Err(format!("duplicate feature '{}'", feature.name));
            }
            let unknown = feature.rule.inputs().into_iter().find(|n| self.slot(n).is_none());
            if let Some(missing) = unknown {
                return Err(format!(
                    "derived feature '{}' reads '{missing}', which is not an input slot",
                    feature.name
                ));
            }
            feature
                .rule
                .validate()
                .map_err(|e| format!("derived feature '{}': {e}", feature.name))?;
        }
        Ok(())
    }

    /// Built-in county schema for a property type.
    pub fn default_for(property_type: PropertyType) -> Self {
        let mut slots = vec![
            FeatureSlot::new("square_feet", FeatureKind::Continuous, 300.0, 20_000.0),
            FeatureSlot::new("bedrooms", FeatureKind::Count, 0.0, 12.0),
            FeatureSlot::new("bathrooms", FeatureKind::Continuous, 0.0, 12.0),
            FeatureSlot::new("year_built", FeatureKind::Count, 1850.0, 2035.0),
        ];
        match property_type {
            PropertyType::SingleFamily => slots.extend([
                FeatureSlot::new("lot_size", FeatureKind::Continuous, 0.0, 500_000.0).clamped(),
                FeatureSlot::new("stories", FeatureKind::Count, 1.0, 4.0),
                FeatureSlot::new("garage_spaces", FeatureKind::Count, 0.0, 8.0).clamped(),
                FeatureSlot::binary("pool"),
            ]),
            PropertyType::Condo => slots.extend([
                FeatureSlot::new("floor_level", FeatureKind::Count, 1.0, 80.0),
                FeatureSlot::new("hoa_fee", FeatureKind::Continuous, 0.0, 5_000.0).clamped(),
                FeatureSlot::binary("has_view"),
            ]),
            PropertyType::Townhouse => slots.extend([
                FeatureSlot::new("lot_size", FeatureKind::Continuous, 0.0, 50_000.0).clamped(),
                FeatureSlot::new("stories", FeatureKind::Count, 1.0, 4.0),
                FeatureSlot::new("hoa_fee", FeatureKind::Continuous, 0.0, 5_000.0).clamped(),
                FeatureSlot::new("garage_spaces", FeatureKind::Count, 0.0, 4.0).clamped(),
            ]),
        }
        slots.extend([
            FeatureSlot::ordinal("quality_score"),
            FeatureSlot::ordinal("school_rating"),
            FeatureSlot::ordinal("crime_score"),
            FeatureSlot::ordinal("walkability_score"),
            FeatureSlot::new("latitude", FeatureKind::Continuous, 35.0, 37.0),
            FeatureSlot::new("longitude", FeatureKind::Continuous, -116.0, -114.0),
            FeatureSlot::new("median_income", FeatureKind::Continuous, 0.0, 500_000.0).clamped(),
            FeatureSlot::new("mortgage_rate_30yr", FeatureKind::Continuous, 0.0, 20.0),
            FeatureSlot::new("unemployment_rate", FeatureKind::Continuous, 0.0, 40.0),
        ]);

        let mut derived = vec![
            DerivedFeature::new("property_age", Derivation::age("year_built", REFERENCE_YEAR)),
            DerivedFeature::new("total_rooms", Derivation::sum(&["bedrooms", "bathrooms"])),
            DerivedFeature::new("bed_bath_ratio", Derivation::ratio("bedrooms", "bathrooms")),
            DerivedFeature::new("living_area_ratio", Derivation::ratio("square_feet", "bedrooms")),
        ];
        if property_type != PropertyType::Condo {
            derived.push(DerivedFeature::new(
                "lot_to_house_ratio",
                Derivation::ratio("lot_size", "square_feet"),
            ));
        }
        for (name, to) in LANDMARKS {
            let rule = Derivation::distance("latitude", "longitude", to);
            derived.push(DerivedFeature::new(name, rule));
        }
        let neighborhood = Derivation::Score {
            terms: vec![
                ScoreTerm::new("school_rating", 0.4),
                ScoreTerm::new("crime_score", 0.4).inverted(),
                ScoreTerm::new("walkability_score", 0.2),
            ],
        };
        derived.extend([
            DerivedFeature::new("neighborhood_quality", neighborhood),
            DerivedFeature::new(
                "affordability_index",
                Derivation::complement("mortgage_rate_30yr", 10.0),
            ),
            DerivedFeature::new(
                "economic_health_index",
                Derivation::complement("unemployment_rate", 10.0),
            ),
        ]);
        Self::new(1, slots).with_derived(derived)
    }
}
