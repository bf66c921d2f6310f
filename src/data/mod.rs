//! Data sources that do not come from callers: synthetic county sales.

pub mod synthetic;

pub use synthetic::*;
