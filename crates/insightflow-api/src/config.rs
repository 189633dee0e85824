//! Engine configuration loader.
//!
//! Reads an `insightflow.toml` given by `--config` (or `INSIGHTFLOW_CONFIG`)
//! and deserializes it into [`EngineConfig`]. Without a path the defaults are
//! used.

use std::path::Path;

use anyhow::{Context, Result, bail};

use insightflow_types::config::EngineConfig;

/// Load and validate the engine configuration.
///
/// - No path: [`EngineConfig::default()`].
/// - A path that cannot be read or parsed is an error; an explicitly named
///   file is never silently ignored.
pub async fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        tracing::debug!("no config file given, using defaults");
        return Ok(EngineConfig::default());
    };

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    if let Err(reason) = config.validate() {
        bail!("Invalid config in {}: {reason}", path.display());
    }

    tracing::debug!(path = %path.display(), ?config, "loaded engine config");
    Ok(config)
}
