//! Valuation: point estimates with uncertainty intervals.

pub mod interval;
pub mod predictor;

pub use predictor::*;
