//! Model training orchestration.
//!
//! Responsibilities:
//!
//! - fit point + quantile ensembles per property type ([`Trainer`])
//! - generate hyperparameter grids and k-fold partitions
//! - evaluate grid candidates (parallel) and select the simplest best one
//! - cooperative cancellation of long searches

pub mod cancel;
pub mod folds;
pub mod grid;
pub mod search;
pub mod trainer;

pub use cancel::*;
pub use folds::*;
pub use grid::*;
pub use search::*;
pub use trainer::*;
