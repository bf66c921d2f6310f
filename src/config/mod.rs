//! Engine configuration: settings tree, validation and layered loading.

pub mod loader;
pub mod settings;

pub use loader::*;
pub use settings::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("configuration file '{}' does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("invalid configuration in [{section}]: {detail}")]
    Invalid { section: String, detail: String },

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}
