//! Mathematical utilities: design matrices, descriptive statistics and metrics.

pub mod design;
pub mod metrics;
pub mod stats;

pub use design::*;
pub use metrics::*;
pub use stats::*;
