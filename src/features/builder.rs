//! Raw mapping → validated `FeatureVector`.
//!
//! Check order is fixed so the same input always produces the same error:
//!
//! 1. every schema slot must be present (`MissingFeature`, declaration order)
//! 2. unknown keys are rejected in strict mode (`UnknownFeature`, key order)
//! 3. each slot is coerced (`TypeMismatch`) and range-checked (`OutOfRange`,
//!    or clamped when the slot allows it)
//!
//! Derived features are appended after the checks pass. Callers never supply
//! them; a raw key naming one is an unknown key.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    FeatureKind, FeatureSchema, FeatureSlot, FeatureVector, PropertyType, RawFeatures, RawValue,
};
use crate::error::ValidationError;
use crate::features::derive;

/// What to do with keys the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    #[default]
    Strict,
    Permissive,
}

/// Validates raw mappings against one property type's schema.
#[derive(Debug, Clone)]
pub struct FeatureVectorBuilder<'a> {
    property_type: PropertyType,
    schema: &'a FeatureSchema,
    unknown: UnknownKeyPolicy,
}

impl<'a> FeatureVectorBuilder<'a> {
    pub fn new(property_type: PropertyType, schema: &'a FeatureSchema) -> Self {
        Self {
            property_type,
            schema,
            unknown: UnknownKeyPolicy::Strict,
        }
    }

    pub fn with_unknown_policy(mut self, policy: UnknownKeyPolicy) -> Self {
        self.unknown = policy;
        self
    }

    pub fn build(&self, raw: &RawFeatures) -> Result<FeatureVector, ValidationError> {
        if let Some(slot) = self.schema.slots.iter().find(|s| !raw.contains_key(&s.name)) {
            return Err(ValidationError::MissingFeature {
                feature: slot.name.clone(),
            });
        }

        for key in raw.keys() {
            if self.schema.slot(key).is_some() {
                continue;
            }
            match self.unknown {
                UnknownKeyPolicy::Strict => {
                    return Err(ValidationError::UnknownFeature { feature: key.clone() });
                }
                UnknownKeyPolicy::Permissive => {
                    debug!(
                        feature = %key,
                        property_type = %self.property_type,
                        "dropping unknown feature"
                    );
                }
            }
        }

        let mut values = Vec::with_capacity(self.schema.len());
        let mut clamped = Vec::new();
        for slot in &self.schema.slots {
            let value = coerce(slot, &raw[&slot.name])?;
            values.push(check_range(slot, value, &mut clamped)?);
        }
        let derived = derive(self.schema, &values);
        values.extend(derived);

        Ok(FeatureVector::new(
            self.property_type,
            self.schema.version,
            self.schema.names(),
            values,
            self.schema.derived.len(),
            clamped,
        ))
    }
}

fn coerce(slot: &FeatureSlot, raw: &RawValue) -> Result<f64, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        feature: slot.name.clone(),
        expected: slot.kind,
        found: raw.to_string(),
    };

    let value = match raw {
        RawValue::Number(v) => *v,
        RawValue::Bool(b) if slot.kind == FeatureKind::Binary => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        RawValue::Bool(_) => return Err(mismatch()),
        RawValue::Text(s) => {
            let s = s.trim();
            match (slot.kind, s.to_ascii_lowercase().as_str()) {
                (FeatureKind::Binary, "true" | "yes" | "y") => 1.0,
                (FeatureKind::Binary, "false" | "no" | "n") => 0.0,
                _ => s.parse::<f64>().map_err(|_| mismatch())?,
            }
        }
    };

    if !value.is_finite() {
        return Err(mismatch());
    }
    match slot.kind {
        FeatureKind::Continuous => {}
        FeatureKind::Count | FeatureKind::Ordinal => {
            if value.fract() != 0.0 {
                return Err(mismatch());
            }
        }
        FeatureKind::Binary => {
            if value != 0.0 && value != 1.0 {
                return Err(mismatch());
            }
        }
    }
    Ok(value)
}

fn check_range(
    slot: &FeatureSlot,
    value: f64,
    clamped: &mut Vec<String>,
) -> Result<f64, ValidationError> {
    if value >= slot.min && value <= slot.max {
        return Ok(value);
    }
    if slot.clamp {
        clamped.push(slot.name.clone());
        return Ok(value.clamp(slot.min, slot.max));
    }
    Err(ValidationError::OutOfRange {
        feature: slot.name.clone(),
        value,
        min: slot.min,
        max: slot.max,
    })
}
