use std::path::PathBuf;

use anyhow::{Context, Result};
use policyd_policy_center::{load_config, EngineConfig};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: EngineConfig,
    pub path: PathBuf,
}

/// Priority: `--config`, then `./config/policyd.yaml`, then
/// `<config dir>/policyd/policyd.yaml`. A missing file means defaults.
pub fn discover_config_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let local_config = PathBuf::from("config/policyd.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("policyd");
    path.push("policyd.yaml");
    Ok(path)
}

pub fn load_engine_config(explicit: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = discover_config_path(explicit)?;
    if explicit.is_some() && !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let config = load_config(Some(path.as_path()))
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    if path.exists() {
        info!("Loaded configuration from: {}", path.display());
    } else {
        debug!("Config file not found, using defaults: {}", path.display());
    }
    Ok(LoadedConfig { config, path })
}
