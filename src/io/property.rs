//! Property JSON input for `predict` and `explain`.
//!
//! Accepts a single object or an array of objects. Values may be numbers,
//! booleans or strings; `null` is treated as absent. `id` and `property_type`
//! keys are metadata and never reach the schema builder.

use std::path::Path;

use serde_json::Value;

use crate::domain::{RawFeatures, RawValue};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInput {
    pub id: Option<String>,
    pub raw: RawFeatures,
}

pub fn read_properties(path: &Path) -> Result<Vec<PropertyInput>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))?;
    parse_properties(&text).map_err(|e| {
        AppError::new(3, format!("Invalid property JSON '{}': {e}", path.display()))
    })
}

pub fn parse_properties(text: &str) -> Result<Vec<PropertyInput>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| to_input(item).map_err(|e| format!("item {i}: {e}")))
            .collect(),
        item @ Value::Object(_) => Ok(vec![to_input(item)?]),
        _ => Err("expected an object or an array of objects".to_string()),
    }
}

fn to_input(value: Value) -> Result<PropertyInput, String> {
    let Value::Object(map) = value else {
        return Err("expected an object".to_string());
    };

    let mut id = None;
    let mut raw = RawFeatures::new();
    for (key, v) in map {
        if key == "id" {
            id = match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            continue;
        }
        if key == "property_type" {
            continue;
        }
        let raw_value = match v {
            Value::Null => continue,
            Value::Bool(b) => RawValue::Bool(b),
            Value::Number(n) => RawValue::Number(
                n.as_f64()
                    .ok_or_else(|| format!("'{key}' is not a finite number"))?,
            ),
            Value::String(s) => RawValue::Text(s),
            Value::Array(_) | Value::Object(_) => return Err(format!("'{key}' must be a scalar")),
        };
        raw.insert(key, raw_value);
    }
    Ok(PropertyInput { id, raw })
}
