//! Command-line parsing for the `valuer` binary.
//!
//! Argument parsing and command dispatch stay separate from the engine code.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::PropertyType;
use crate::io::RetrainSchedule;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "valuer", version, about = "County residential valuation engine")]
pub struct Cli {
    /// Configuration file (merged over ./valuer.toml and the built-in defaults).
    #[arg(long, global = true, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train and publish the model triplet for one property type.
    Train(TrainArgs),
    /// Train every property type found in a sales CSV (concurrently).
    TrainAll(DataArgs),
    /// Value one or more properties from a JSON file.
    Predict(PredictArgs),
    /// Break a valuation down into per-feature contributions.
    Explain(ExplainArgs),
    /// Rank features by mean absolute contribution over the training set.
    Importance(ImportanceArgs),
    /// Score the stored point model on held-out sales.
    Evaluate(EvaluateArgs),
    /// Retrain all property types when the schedule says they are due.
    Retrain(RetrainArgs),
    /// Write a synthetic sales CSV.
    Synth(SynthArgs),
    /// Inspect the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct TrainArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    /// Sales CSV with a `sale_price` column and one column per schema feature.
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    /// Grid-search hyperparameters with k-fold cross-validation first.
    #[arg(long)]
    pub search: bool,

    /// Number of cross-validation folds (overrides `training.cv_folds`).
    #[arg(long)]
    pub folds: Option<usize>,

    /// Write the training report as JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct DataArgs {
    /// Sales CSV with `property_type` and `sale_price` columns.
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct PredictArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    /// JSON object (or array of objects) mapping feature names to values.
    #[arg(long, value_name = "JSON")]
    pub input: PathBuf,

    /// Interval confidence level (defaults to `training.confidence_level`).
    #[arg(long)]
    pub confidence: Option<f64>,

    /// Seed for bootstrap intervals (overrides `prediction.seed`).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the valuations as JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct ExplainArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    #[arg(long, value_name = "JSON")]
    pub input: PathBuf,

    /// Show the top-N contributions.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Write the explanations as JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct ImportanceArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct EvaluateArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct RetrainArgs {
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    #[arg(long, value_enum, default_value_t = RetrainSchedule::Monthly)]
    pub schedule: RetrainSchedule,
}

#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    #[arg(short = 't', long, value_enum)]
    pub property_type: PropertyType,

    /// Number of sales to generate.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub count: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of the price noise.
    #[arg(long, default_value_t = 50_000.0)]
    pub noise_sd: f64,

    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration (defaults + files + environment).
    Show,
    /// Print the built-in defaults as a starting `valuer.toml`.
    Defaults,
}
