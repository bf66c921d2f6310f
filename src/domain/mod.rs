//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - property types, model roles and feature kinds
//! - feature schemas and validated feature vectors
//! - valuation outputs (`ValuationResult`, `Explanation`, `FeatureContribution`)

pub mod schema;
pub mod types;

pub use schema::*;
pub use types::*;
