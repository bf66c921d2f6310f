//! Exports: JSON documents for downstream tools and synthetic sales CSVs.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::data::SyntheticSale;
use crate::domain::{FeatureSchema, PropertyType};
use crate::error::AppError;

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let write_failed = |e: &dyn std::fmt::Display| {
        AppError::new(2, format!("Failed to write export JSON '{}': {e}", path.display()))
    };
    let file = File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create export JSON '{}': {e}", path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| write_failed(&e))?;
    writer.flush().map_err(|e| write_failed(&e))?;
    Ok(())
}

/// Write generated sales in the layout `load_sales` reads back.
pub fn write_sales_csv(
    path: &Path,
    property_type: PropertyType,
    schema: &FeatureSchema,
    sales: &[SyntheticSale],
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display())))?;
    write_sales(file, property_type, schema, sales)
        .map_err(|e| AppError::new(2, format!("Failed to write CSV '{}': {e}", path.display())))
}

fn write_sales<W: Write>(
    out: W,
    property_type: PropertyType,
    schema: &FeatureSchema,
    sales: &[SyntheticSale],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);

    // Derived features are recomputed on ingest, so only input slots are written.
    let mut header = vec!["id".to_string(), "property_type".to_string()];
    header.extend(schema.slots.iter().map(|slot| slot.name.clone()));
    header.push("sale_price".to_string());
    writer.write_record(&header)?;

    for (i, sale) in sales.iter().enumerate() {
        let mut row = vec![
            format!("{}-{:05}", property_type.as_str(), i + 1),
            property_type.to_string(),
        ];
        row.extend(schema.slots.iter().map(|slot| {
            sale.raw
                .get(&slot.name)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        row.push(format!("{:.2}", sale.sale_price));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::data::{SyntheticConfig, generate_raw_sales};
    use crate::io::read_sales;

    #[test]
    fn synthetic_csv_reads_back() {
        let pt = PropertyType::SingleFamily;
        let config = EngineConfig::default();
        let schema = &config.property_type(pt).schema;
        let sales = generate_raw_sales(pt, schema, &SyntheticConfig::new(25, 3)).unwrap();

        let mut buf = Vec::new();
        write_sales(&mut buf, pt, schema, &sales).unwrap();
        let ingested = read_sales(buf.as_slice(), &config, None).unwrap();
        assert!(ingested.row_errors.is_empty(), "{:?}", ingested.row_errors);
        assert_eq!(ingested.for_type(pt).len(), 25);
    }

    #[test]
    fn json_export_is_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let back: Vec<i32> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
