//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and loads `.env`
//! - installs the log subscriber
//! - loads the layered configuration
//! - dispatches to the shared workflows in [`pipeline`] and prints reports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{
    Cli, Command, ConfigAction, DataArgs, EvaluateArgs, ExplainArgs, ImportanceArgs, PredictArgs,
    RetrainArgs, SynthArgs, TrainArgs,
};
use crate::config::{ConfigError, ConfigLoader, EngineConfig};
use crate::data::{SyntheticConfig, generate_raw_sales};
use crate::engine::ValuationEngine;
use crate::error::AppError;
use crate::fit::CancelToken;
use crate::io::{load_sales, write_json, write_sales_csv};
use crate::report;
use crate::store::FileModelStore;

pub mod pipeline;

/// Row errors printed before a summary.
const ROW_ERROR_LIMIT: usize = 10;

/// Entry point for the `valuer` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; variables may come from the real environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Command::Config(args) = &cli.command {
        if matches!(args.action, ConfigAction::Defaults) {
            print!("{}", ConfigLoader::render_defaults()?);
            return Ok(());
        }
    }

    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    match cli.command {
        Command::Train(args) => handle_train(&mut config, args),
        Command::TrainAll(args) => handle_train_all(config, args),
        Command::Predict(args) => handle_predict(config, args),
        Command::Explain(args) => handle_explain(config, args),
        Command::Importance(args) => handle_importance(config, args),
        Command::Evaluate(args) => handle_evaluate(config, args),
        Command::Retrain(args) => handle_retrain(config, args),
        Command::Synth(args) => handle_synth(&config, args),
        Command::Config(_) => {
            let rendered = toml::to_string_pretty(&config).map_err(ConfigError::from)?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// `-v` count to log level; `RUST_LOG` wins when no `-v` is given.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    // Ignored when a subscriber is already installed (e.g. in tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_engine(config: EngineConfig) -> ValuationEngine<FileModelStore> {
    ValuationEngine::with_file_store(config)
}

fn handle_train(config: &mut EngineConfig, args: TrainArgs) -> Result<(), AppError> {
    if let Some(folds) = args.folds {
        if folds < 2 {
            return Err(AppError::new(2, format!("--folds must be >= 2, got {folds}")));
        }
        config.training.cv_folds = folds;
    }
    let engine = open_engine(config.clone());
    let cancel = CancelToken::new();
    let run = pipeline::run_train(&engine, args.property_type, &args.data, args.search, &cancel)?;

    eprint!("{}", report::format_row_errors(&run.ingest.row_errors, ROW_ERROR_LIMIT));
    println!("{}", report::format_training_summary(&run.published.report));
    for handle in &run.published.handles {
        println!("saved {} {} -> {}", handle.role, handle.version, handle.location);
    }

    if let Some(path) = &args.export {
        write_json(path, &run.published)?;
    }
    Ok(())
}

fn handle_train_all(config: EngineConfig, args: DataArgs) -> Result<(), AppError> {
    let engine = open_engine(config);
    let run = pipeline::run_train_all(&engine, &args.data, &CancelToken::new())?;

    eprint!("{}", report::format_row_errors(&run.ingest.row_errors, ROW_ERROR_LIMIT));
    print!("{}", report::format_train_all(&run.results));
    if run.succeeded() == 0 {
        let code = run
            .results
            .iter()
            .find_map(|(_, r)| r.as_ref().err().map(|e| e.exit_code()))
            .unwrap_or(3);
        return Err(AppError::new(code, "No property type could be trained."));
    }
    Ok(())
}

fn handle_retrain(config: EngineConfig, args: RetrainArgs) -> Result<(), AppError> {
    let engine = open_engine(config);
    let cancel = CancelToken::new();
    let outcome =
        pipeline::run_retrain(&engine, &args.data, args.schedule, pipeline::today(), &cancel)?;
    match outcome {
        pipeline::RetrainOutcome::NotDue { last, schedule } => {
            println!("Retraining not needed: last trained {last}, schedule {schedule:?}.");
        }
        pipeline::RetrainOutcome::Retrained(run) => {
            eprint!("{}", report::format_row_errors(&run.ingest.row_errors, ROW_ERROR_LIMIT));
            print!("{}", report::format_train_all(&run.results));
            if run.succeeded() == 0 {
                return Err(AppError::new(3, "Retraining failed for every property type."));
            }
        }
    }
    Ok(())
}

fn handle_predict(config: EngineConfig, args: PredictArgs) -> Result<(), AppError> {
    let confidence = args.confidence.unwrap_or(config.training.confidence_level);
    let engine = open_engine(config);
    let records =
        pipeline::run_predict(&engine, args.property_type, &args.input, confidence, args.seed)?;

    for r in &records {
        match (&r.valuation, &r.error) {
            (Some(v), _) => print!("{}", report::format_valuation(v, r.id.as_deref())),
            (None, Some(e)) => eprintln!("[{}] error: {e}", r.id.as_deref().unwrap_or("-")),
            (None, None) => {}
        }
    }
    if let Some(path) = &args.export {
        write_json(path, &records)?;
    }

    if !records.is_empty() && records.iter().all(|r| r.valuation.is_none()) {
        let code = records.iter().map(|r| r.exit_code).find(|&c| c != 0).unwrap_or(3);
        return Err(AppError::new(code, "No property could be valued."));
    }
    Ok(())
}

fn handle_explain(config: EngineConfig, args: ExplainArgs) -> Result<(), AppError> {
    let engine = open_engine(config);
    let records = pipeline::run_explain(&engine, args.property_type, &args.input)?;
    for r in &records {
        if let Some(id) = &r.id {
            println!("[{id}]");
        }
        println!("{}", report::format_explanation(&r.explanation, args.top));
    }
    if let Some(path) = &args.export {
        write_json(path, &records)?;
    }
    Ok(())
}

fn handle_importance(config: EngineConfig, args: ImportanceArgs) -> Result<(), AppError> {
    let engine = open_engine(config);
    let ranked = engine.global_importance(args.property_type)?;
    print!("{}", report::format_importance(args.property_type, &ranked, args.top));
    Ok(())
}

fn handle_evaluate(config: EngineConfig, args: EvaluateArgs) -> Result<(), AppError> {
    let engine = open_engine(config);
    let ingest = load_sales(&args.data, engine.config(), Some(args.property_type))?;
    eprint!("{}", report::format_row_errors(&ingest.row_errors, ROW_ERROR_LIMIT));
    let metrics = engine.evaluate(args.property_type, ingest.for_type(args.property_type))?;
    print!("{}", report::format_metrics(args.property_type, &metrics));
    Ok(())
}

fn handle_synth(config: &EngineConfig, args: SynthArgs) -> Result<(), AppError> {
    let schema = &config.property_type(args.property_type).schema;
    let synth = SyntheticConfig {
        noise_sd: args.noise_sd,
        ..SyntheticConfig::new(args.count, args.seed)
    };
    let sales = generate_raw_sales(args.property_type, schema, &synth)?;
    write_sales_csv(&args.out, args.property_type, schema, &sales)?;
    println!(
        "wrote {} synthetic {} sales to {}",
        sales.len(),
        args.property_type,
        args.out.display()
    );
    Ok(())
}
