//! Input/output helpers.
//!
//! - sales CSV ingest + validation (`ingest`)
//! - property JSON input (`property`)
//! - JSON and CSV exports (`export`)
//! - retrain ledger (`ledger`)

pub mod export;
pub mod ingest;
pub mod ledger;
pub mod property;

pub use export::*;
pub use ingest::*;
pub use ledger::*;
pub use property::*;
