//! CLI command implementations.

use std::path::Path;

use miette::{Result, WrapErr};
use stepwise_procedure::EditorConfig;

pub mod check;
pub mod edit;
pub mod new;
pub mod show;

/// Read the `--config` file, or fall back to the defaults.
pub fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    match path {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            EditorConfig::from_file(path)
                .wrap_err_with(|| format!("Failed to load configuration: {}", path.display()))
        }
        None => Ok(EditorConfig::default()),
    }
}
