//! Retrain ledger: when models were last trained and how they scored.
//!
//! Stored as `<model_dir>/last_training.json` and consulted by `valuer retrain`
//! to decide whether a schedule is due.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::PropertyType;
use crate::error::AppError;
use crate::math::RegressionMetrics;

pub const LEDGER_FILE: &str = "last_training.json";

/// How often models should be retrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RetrainSchedule {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    /// Retrain on every invocation (e.g. after a market shift).
    Always,
}

impl RetrainSchedule {
    /// Minimum age in days of the last training before a retrain is due.
    pub fn min_age_days(self) -> i64 {
        match self {
            RetrainSchedule::Daily => 1,
            RetrainSchedule::Weekly => 7,
            RetrainSchedule::Monthly => 30,
            RetrainSchedule::Quarterly => 90,
            RetrainSchedule::Always => 0,
        }
    }

    /// Never-trained models are always due.
    pub fn is_due(self, last: Option<NaiveDate>, today: NaiveDate) -> bool {
        match last {
            None => true,
            Some(last) => (today - last).num_days() >= self.min_age_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLedger {
    pub date: NaiveDate,
    /// Headline metrics of the point model per successfully trained type.
    #[serde(default)]
    pub property_types: BTreeMap<PropertyType, RegressionMetrics>,
}

pub fn ledger_path(model_dir: &Path) -> PathBuf {
    model_dir.join(LEDGER_FILE)
}

/// `Ok(None)` when no ledger has been written yet.
pub fn read_ledger(path: &Path) -> Result<Option<TrainingLedger>, AppError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            let message = format!("Failed to read ledger '{}': {e}", path.display());
            return Err(AppError::new(2, message));
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| AppError::new(4, format!("Corrupt ledger '{}': {e}", path.display())))
}

/// Replace the ledger atomically.
pub fn write_ledger(path: &Path, ledger: &TrainingLedger) -> Result<(), AppError> {
    let io_err = |e: std::io::Error| {
        AppError::new(2, format!("Failed to write ledger '{}': {e}", path.display()))
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    let json = serde_json::to_vec_pretty(ledger)
        .map_err(|e| AppError::new(2, format!("Failed to encode ledger: {e}")))?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn schedules_compare_against_the_last_training_date() {
        let today = day(2024, 6, 30);
        assert!(RetrainSchedule::Monthly.is_due(None, today));
        assert!(RetrainSchedule::Monthly.is_due(Some(day(2024, 5, 31)), today));
        assert!(!RetrainSchedule::Monthly.is_due(Some(day(2024, 6, 1)), today));
        assert!(RetrainSchedule::Weekly.is_due(Some(day(2024, 6, 23)), today));
        assert!(!RetrainSchedule::Daily.is_due(Some(today), today));
        assert!(RetrainSchedule::Always.is_due(Some(today), today));
        assert!(!RetrainSchedule::Quarterly.is_due(Some(day(2024, 4, 1)), today));
    }

    #[test]
    fn ledger_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path());
        assert_eq!(read_ledger(&path).unwrap(), None);

        let mut property_types = BTreeMap::new();
        property_types.insert(
            PropertyType::Condo,
            RegressionMetrics {
                n: 10,
                rmse: 1.0,
                mae: 0.5,
                r2: 0.9,
                mape: 2.0,
            },
        );
        let ledger = TrainingLedger {
            date: day(2024, 1, 15),
            property_types,
        };
        write_ledger(&path, &ledger).unwrap();
        assert_eq!(read_ledger(&path).unwrap(), Some(ledger));
    }

    #[test]
    fn corrupt_ledger_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path());
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_ledger(&path).unwrap_err().exit_code(), 4);
    }
}
