//! Feature attributions: local explanations and global importance.

pub mod attributor;

pub use attributor::*;
