//! `home-valuer` library crate.
//!
//! The binary (`valuer`) is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - the valuation engine can be embedded by other services
//! - code stays easy to navigate as the project grows
//!
//! Start at [`engine::ValuationEngine`].

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod explain;
pub mod features;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod predict;
pub mod report;
pub mod store;

pub use engine::ValuationEngine;
