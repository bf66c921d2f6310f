//! Boosted-tree models.
//!
//! - [`tree`]: regression trees and their greedy builder
//! - [`booster`]: the [`Booster`] capability and its gradient-boosting implementation
//! - [`shap`]: exact TreeSHAP attributions
//! - [`ensemble`]: trained models, triplets and inference handles

pub mod booster;
pub mod ensemble;
pub mod shap;
pub mod tree;

pub use booster::*;
pub use ensemble::*;
pub use tree::{Node, RegressionTree};
