//! Configuration loading with a fixed resolution order.
//!
//! Exactly one of three mutually exclusive sources wins, in priority
//! order: explicit file path argument, inline environment value, bundled
//! default resource.

use super::PipelineConfig;
use crate::errors::ConfigurationError;
use std::path::Path;
use tracing::info;

/// Environment variable holding an inline configuration document.
pub const ENV_CONFIG: &str = "CONFIG";

/// Bundled fallback configuration.
const DEFAULT_CONFIG: &str = include_str!("../../resources/default-config.json");

/// Loads the pipeline configuration.
///
/// Resolution order: `path` argument, then the `CONFIG` environment
/// variable (inline JSON), then the bundled default resource.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if the winning source cannot be read
/// or does not describe a valid configuration.
pub fn load(path: Option<&Path>) -> Result<PipelineConfig, ConfigurationError> {
    if let Some(path) = path {
        info!(path = %path.display(), "reading config from file");
        let text =
            std::fs::read_to_string(path).map_err(|source| ConfigurationError::Unreadable {
                path: path.display().to_string(),
                source,
            })?;
        return PipelineConfig::from_json(&text);
    }

    if let Ok(text) = std::env::var(ENV_CONFIG) {
        info!("reading config from environment");
        return PipelineConfig::from_json(&text);
    }

    info!("reading bundled default config");
    PipelineConfig::from_json(DEFAULT_CONFIG)
}
