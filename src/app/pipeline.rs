//! Shared workflows behind the CLI commands.
//!
//! Each function takes an engine plus plain arguments and returns computed
//! outputs; printing stays in `app`.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::domain::{Explanation, ModelRole, PropertyType, ValuationResult};
use crate::engine::{PublishedTraining, ValuationEngine};
use crate::error::{AppError, EngineError};
use crate::fit::CancelToken;
use crate::io::{
    IngestedSales, RetrainSchedule, TrainingLedger, ledger_path, load_sales, read_ledger,
    read_properties, write_ledger,
};
use crate::predict::Predictor;
use crate::store::ModelStore;

/// Outputs of `valuer train`.
#[derive(Debug)]
pub struct TrainRun {
    pub ingest: IngestedSales,
    pub published: PublishedTraining,
}

/// Outputs of `valuer train-all` and a due `valuer retrain`.
#[derive(Debug)]
pub struct TrainAllRun {
    pub ingest: IngestedSales,
    pub results: Vec<(PropertyType, Result<PublishedTraining, EngineError>)>,
}

impl TrainAllRun {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }
}

#[derive(Debug)]
pub enum RetrainOutcome {
    NotDue { last: NaiveDate, schedule: RetrainSchedule },
    Retrained(TrainAllRun),
}

/// One valuation (or its failure) keyed by the input's id.
#[derive(Debug, Serialize)]
pub struct ValuationRecord {
    pub id: Option<String>,
    pub valuation: Option<ValuationResult>,
    pub error: Option<String>,
    #[serde(skip)]
    pub exit_code: u8,
}

#[derive(Debug, Serialize)]
pub struct ExplanationRecord {
    pub id: Option<String>,
    pub explanation: Explanation,
}

pub fn run_train<S: ModelStore>(
    engine: &ValuationEngine<S>,
    property_type: PropertyType,
    data: &Path,
    search: bool,
    cancel: &CancelToken,
) -> Result<TrainRun, AppError> {
    let ingest = load_sales(data, engine.config(), Some(property_type))?;
    let samples = ingest.for_type(property_type);

    let trained = if search {
        engine.search_and_train(property_type, samples, None, cancel)?
    } else {
        engine.train(property_type, samples)?
    };
    let published = engine.publish(trained)?;
    Ok(TrainRun { ingest, published })
}

pub fn run_train_all<S: ModelStore>(
    engine: &ValuationEngine<S>,
    data: &Path,
    cancel: &CancelToken,
) -> Result<TrainAllRun, AppError> {
    let ingest = load_sales(data, engine.config(), None)?;
    let results = engine.train_all(&ingest.samples, cancel);
    Ok(TrainAllRun { ingest, results })
}

/// Retrain everything when `schedule` is due, then record the run in the ledger.
///
/// The ledger only moves forward when at least one property type trained.
pub fn run_retrain<S: ModelStore>(
    engine: &ValuationEngine<S>,
    data: &Path,
    schedule: RetrainSchedule,
    today: NaiveDate,
    cancel: &CancelToken,
) -> Result<RetrainOutcome, AppError> {
    let path = ledger_path(&engine.config().storage.model_dir);
    let previous = read_ledger(&path)?;
    let last = previous.as_ref().map(|l| l.date);

    if let Some(last) = last {
        if !schedule.is_due(Some(last), today) {
            tracing::info!(%last, ?schedule, "retraining not due");
            return Ok(RetrainOutcome::NotDue { last, schedule });
        }
    }

    let run = run_train_all(engine, data, cancel)?;
    if run.succeeded() > 0 {
        let mut property_types = previous.map(|l| l.property_types).unwrap_or_default();
        for (pt, result) in &run.results {
            let metrics = result
                .as_ref()
                .ok()
                .and_then(|p| p.report.role(ModelRole::Point))
                .and_then(|r| r.metrics.validation.or(r.metrics.train));
            if let Some(m) = metrics {
                property_types.insert(*pt, m);
            }
        }
        write_ledger(&path, &TrainingLedger { date: today, property_types })?;
    }
    Ok(RetrainOutcome::Retrained(run))
}

/// Today's date in UTC, as recorded in the ledger.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Value every property in a JSON input file. Items fail independently.
pub fn run_predict<S: ModelStore>(
    engine: &ValuationEngine<S>,
    property_type: PropertyType,
    input: &Path,
    confidence_level: f64,
    seed: Option<u64>,
) -> Result<Vec<ValuationRecord>, AppError> {
    let inputs = read_properties(input)?;
    let models = engine.models(property_type)?;

    let mut vectors = Vec::with_capacity(inputs.len());
    let mut records = Vec::with_capacity(inputs.len());
    for input in &inputs {
        match engine.build_vector(property_type, &input.raw) {
            Ok(v) => {
                vectors.push(v);
                records.push(None);
            }
            Err(e) => records.push(Some(e)),
        }
    }

    let mut config = engine.config().prediction.clone();
    if seed.is_some() {
        config.seed = seed;
    }
    let predictor = Predictor::new(config).with_tail_split(engine.config().training.tail_split);
    let mut valued = predictor.predict_many(&models, &vectors, confidence_level).into_iter();

    let out = inputs
        .into_iter()
        .zip(records)
        .map(|(input, build_error)| {
            let outcome = match build_error {
                Some(e) => Err(e),
                None => valued.next().unwrap_or_else(|| {
                    Err(EngineError::InvalidTrainingData("missing batch result".to_string()))
                }),
            };
            match outcome {
                Ok(v) => ValuationRecord {
                    id: input.id,
                    valuation: Some(v),
                    error: None,
                    exit_code: 0,
                },
                Err(e) => ValuationRecord {
                    id: input.id,
                    valuation: None,
                    error: Some(e.to_string()),
                    exit_code: e.exit_code(),
                },
            }
        })
        .collect();
    Ok(out)
}

/// Explain every property in a JSON input file; the first failure aborts.
pub fn run_explain<S: ModelStore>(
    engine: &ValuationEngine<S>,
    property_type: PropertyType,
    input: &Path,
) -> Result<Vec<ExplanationRecord>, AppError> {
    read_properties(input)?
        .into_iter()
        .map(|input| -> Result<ExplanationRecord, AppError> {
            let vector = engine.build_vector(property_type, &input.raw)?;
            let explanation = engine.explain(property_type, &vector)?;
            Ok(ExplanationRecord {
                id: input.id,
                explanation,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::data::{SyntheticConfig, generate_raw_sales};
    use crate::domain::Hyperparameters;
    use crate::io::write_sales_csv;
    use crate::store::FileModelStore;

    fn engine(dir: &Path) -> ValuationEngine<FileModelStore> {
        let mut config = EngineConfig::default();
        config.storage.model_dir = dir.join("models");
        config.prediction.seed = Some(1);
        for pt in PropertyType::ALL {
            config.property_types.get_mut(pt).hyperparameters = Hyperparameters {
                n_estimators: 20,
                max_depth: 3,
                ..Hyperparameters::default()
            };
        }
        ValuationEngine::with_file_store(config)
    }

    fn write_csv(
        dir: &Path,
        pt: PropertyType,
        engine: &ValuationEngine<FileModelStore>,
    ) -> std::path::PathBuf {
        let path = dir.join(format!("{pt}.csv"));
        let schema = &engine.config().property_type(pt).schema;
        let sales = generate_raw_sales(pt, schema, &SyntheticConfig::new(80, 11)).unwrap();
        write_sales_csv(&path, pt, schema, &sales).unwrap();
        path
    }

    #[test]
    fn retrain_respects_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let csv = write_csv(dir.path(), PropertyType::Condo, &engine);
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let cancel = CancelToken::new();

        let first = run_retrain(&engine, &csv, RetrainSchedule::Monthly, day, &cancel).unwrap();
        let RetrainOutcome::Retrained(run) = first else {
            panic!("first retrain must run");
        };
        assert_eq!(run.succeeded(), 1);

        let later = day + chrono::Duration::days(10);
        let second = run_retrain(&engine, &csv, RetrainSchedule::Monthly, later, &cancel).unwrap();
        assert!(matches!(second, RetrainOutcome::NotDue { .. }));

        let ledger = read_ledger(&ledger_path(&engine.config().storage.model_dir))
            .unwrap()
            .unwrap();
        assert_eq!(ledger.date, day);
        assert!(ledger.property_types.contains_key(&PropertyType::Condo));
    }

    #[test]
    fn predict_reports_bad_items_without_failing_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let csv = write_csv(dir.path(), PropertyType::Townhouse, &engine);
        run_train(&engine, PropertyType::Townhouse, &csv, false, &CancelToken::new()).unwrap();

        let schema = &engine.config().property_type(PropertyType::Townhouse).schema;
        let good = generate_raw_sales(PropertyType::Townhouse, schema, &SyntheticConfig::new(1, 5))
            .unwrap()
            .remove(0)
            .raw;
        let mut bad = good.clone();
        bad.remove("square_feet");
        let items = serde_json::json!([good, bad]);
        let input = dir.path().join("homes.json");
        std::fs::write(&input, items.to_string()).unwrap();

        let records = run_predict(&engine, PropertyType::Townhouse, &input, 0.9, None).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].valuation.is_some());
        assert!(records[1].error.as_deref().unwrap_or("").contains("square_feet"));
        assert_eq!(records[1].exit_code, 3);
    }
}
