//! Feature-vector construction.
//!
//! Callers resolve property, neighborhood and economic data upstream and hand
//! the engine a flat raw mapping; this module validates it against the
//! property type's schema and appends the schema's derived features.

pub mod builder;
pub mod derive;

pub use builder::*;
pub use derive::{derive, haversine_km};
