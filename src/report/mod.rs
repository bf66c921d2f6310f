//! Terminal reports for training runs, valuations and explanations.

pub mod format;

pub use format::*;
