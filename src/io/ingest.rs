//! Sales CSV ingest.
//!
//! Turns a county sales export into validated training samples per property type.
//!
//! - `sale_price` is required
//! - `property_type` is required unless the caller pins one type
//! - every other non-empty cell is handed to the schema builder as text; columns
//!   the schema does not declare are dropped
//! - bad rows are skipped and reported, never fatal on their own

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::config::EngineConfig;
use crate::domain::{PropertyType, RawFeatures, RawValue, TrainingSample};
use crate::error::AppError;
use crate::features::{FeatureVectorBuilder, UnknownKeyPolicy};

const PRICE_COLUMN: &str = "sale_price";
const TYPE_COLUMN: &str = "property_type";
const ID_COLUMN: &str = "id";

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output: samples grouped by property type + row errors.
#[derive(Debug, Clone, Default)]
pub struct IngestedSales {
    pub samples: BTreeMap<PropertyType, Vec<TrainingSample>>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
    /// Rows belonging to a property type other than the pinned one.
    pub rows_filtered: usize,
}

impl IngestedSales {
    pub fn for_type(&self, property_type: PropertyType) -> &[TrainingSample] {
        self.samples.get(&property_type).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Load a sales CSV. With `only`, rows of other types are filtered out and a
/// missing `property_type` column means every row is of that type.
pub fn load_sales(
    path: &Path,
    config: &EngineConfig,
    only: Option<PropertyType>,
) -> Result<IngestedSales, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    let sales = read_sales(file, config, only)?;
    tracing::info!(
        path = %path.display(),
        rows_read = sales.rows_read,
        rows_used = sales.rows_used,
        row_errors = sales.row_errors.len(),
        "ingested sales"
    );
    Ok(sales)
}

/// Same as [`load_sales`] over any reader.
pub fn read_sales<R: Read>(
    reader: R,
    config: &EngineConfig,
    only: Option<PropertyType>,
) -> Result<IngestedSales, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    if !header_map.contains_key(PRICE_COLUMN) {
        return Err(AppError::new(2, format!("Missing required column: `{PRICE_COLUMN}`")));
    }
    if only.is_none() && !header_map.contains_key(TYPE_COLUMN) {
        return Err(AppError::new(
            2,
            format!("Missing required column: `{TYPE_COLUMN}` (or pass a property type)"),
        ));
    }

    let names: Vec<String> = headers.iter().map(normalize_header_name).collect();
    let mut out = IngestedSales::default();

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        out.rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let id = get_optional(&record, &header_map, ID_COLUMN).map(str::to_string);

        let property_type = match resolve_type(&record, &header_map, only) {
            Ok(Some(pt)) => pt,
            Ok(None) => {
                out.rows_filtered += 1;
                continue;
            }
            Err(message) => {
                out.row_errors.push(RowError { line, id, message });
                continue;
            }
        };

        match parse_sample(&record, &names, &header_map, property_type, config) {
            Ok(sample) => {
                out.samples.entry(property_type).or_default().push(sample);
                out.rows_used += 1;
            }
            Err(message) => out.row_errors.push(RowError { line, id, message }),
        }
    }

    if out.rows_used == 0 {
        return Err(AppError::new(3, "No valid sales rows remain after validation."));
    }
    Ok(out)
}

fn resolve_type(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    only: Option<PropertyType>,
) -> Result<Option<PropertyType>, String> {
    let Some(cell) = get_optional(record, header_map, TYPE_COLUMN) else {
        return match only {
            Some(pt) => Ok(Some(pt)),
            None => Err(format!("Missing required value: `{TYPE_COLUMN}`")),
        };
    };
    let pt = PropertyType::parse(cell)
        .ok_or_else(|| format!("Unsupported property type '{cell}'"))?;
    match only {
        Some(wanted) if wanted != pt => Ok(None),
        _ => Ok(Some(pt)),
    }
}

fn parse_sample(
    record: &StringRecord,
    names: &[String],
    header_map: &HashMap<String, usize>,
    property_type: PropertyType,
    config: &EngineConfig,
) -> Result<TrainingSample, String> {
    let price_cell = get_optional(record, header_map, PRICE_COLUMN)
        .ok_or_else(|| format!("Missing required value: `{PRICE_COLUMN}`"))?;
    let sale_price = price_cell
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| {
            format!("Invalid `{PRICE_COLUMN}` '{price_cell}' (must be a positive number)")
        })?;

    let raw: RawFeatures = names
        .iter()
        .zip(record.iter())
        .filter(|(name, _)| !matches!(name.as_str(), PRICE_COLUMN | TYPE_COLUMN | ID_COLUMN))
        .filter(|(_, cell)| !cell.is_empty())
        .map(|(name, cell)| (name.clone(), RawValue::Text(cell.to_string())))
        .collect();

    let schema = &config.property_type(property_type).schema;
    let vector = FeatureVectorBuilder::new(property_type, schema)
        .with_unknown_policy(UnknownKeyPolicy::Permissive)
        .build(&raw)
        .map_err(|e| e.to_string())?;
    Ok(TrainingSample::new(vector, sale_price))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn get_optional<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Derivation, DerivedFeature, FeatureKind, FeatureSchema, FeatureSlot};

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        let schema = FeatureSchema::new(
            1,
            vec![
                FeatureSlot::new("square_feet", FeatureKind::Continuous, 300.0, 20_000.0),
                FeatureSlot::new("bedrooms", FeatureKind::Count, 0.0, 12.0),
            ],
        );
        for pt in PropertyType::ALL {
            config.property_types.get_mut(pt).schema = schema.clone();
        }
        config
    }

    #[test]
    fn groups_rows_by_type_and_reports_bad_ones() {
        let csv = "\u{feff}ID,Property_Type,square_feet,bedrooms,sale_price,zip_code\n\
                   a,condo,900,2,310000,89101\n\
                   b,single-family,2400,4,520000,89102\n\
                   c,condo,abc,2,300000,89101\n\
                   d,multi_family,2000,3,450000,89103\n\
                   e,condo,1000,2,-5,89101\n";
        let sales = read_sales(csv.as_bytes(), &config(), None).unwrap();
        assert_eq!(sales.rows_read, 5);
        assert_eq!(sales.rows_used, 2);
        assert_eq!(sales.for_type(PropertyType::Condo).len(), 1);
        assert_eq!(sales.for_type(PropertyType::SingleFamily).len(), 1);
        assert!(sales.for_type(PropertyType::Townhouse).is_empty());

        let lines: Vec<usize> = sales.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![4, 5, 6]);
        assert_eq!(sales.row_errors[0].id.as_deref(), Some("c"));
        assert!(sales.row_errors[1].message.contains("multi_family"));
    }

    #[test]
    fn pinned_type_filters_and_fills_in() {
        let csv = "square_feet,bedrooms,sale_price\n900,2,310000\n1200,3,350000\n";
        let sales = read_sales(csv.as_bytes(), &config(), Some(PropertyType::Townhouse)).unwrap();
        assert_eq!(sales.for_type(PropertyType::Townhouse).len(), 2);

        let mixed = "property_type,square_feet,bedrooms,sale_price\n\
                     condo,900,2,310000\n\
                     townhouse,1200,3,350000\n";
        let sales = read_sales(mixed.as_bytes(), &config(), Some(PropertyType::Townhouse)).unwrap();
        assert_eq!(sales.rows_used, 1);
        assert_eq!(sales.rows_filtered, 1);
    }

    #[test]
    fn missing_columns_are_fatal() {
        let no_price = "property_type,square_feet,bedrooms\ncondo,900,2\n";
        let err = read_sales(no_price.as_bytes(), &config(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let no_type = "square_feet,bedrooms,sale_price\n900,2,310000\n";
        let err = read_sales(no_type.as_bytes(), &config(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn derived_columns_are_recomputed_not_read() {
        let mut config = config();
        let schema = FeatureSchema::new(
            1,
            vec![
                FeatureSlot::new("bedrooms", FeatureKind::Count, 0.0, 12.0),
                FeatureSlot::new("bathrooms", FeatureKind::Continuous, 0.0, 12.0),
            ],
        )
        .with_derived(vec![DerivedFeature::new(
            "bed_bath_ratio",
            Derivation::ratio("bedrooms", "bathrooms"),
        )]);
        config.property_types.get_mut(PropertyType::Condo).schema = schema;

        let csv = "property_type,bedrooms,bathrooms,bed_bath_ratio,sale_price\n\
                   condo,3,2,99,310000\n\
                   condo,1,0,99,190000\n";
        let sales = read_sales(csv.as_bytes(), &config, None).unwrap();
        let ratios: Vec<f64> = sales
            .for_type(PropertyType::Condo)
            .iter()
            .map(|s| s.features.get("bed_bath_ratio").unwrap())
            .collect();
        assert_eq!(ratios, vec![1.5, 1.0]);
    }

    #[test]
    fn all_rows_invalid_is_an_input_error() {
        let csv = "property_type,square_feet,sale_price\ncondo,900,310000\n";
        let err = read_sales(csv.as_bytes(), &config(), None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
