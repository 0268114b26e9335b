use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{ConfigSource, EngineConfig};
use crate::errors::PolicyError;

const ENV_PREFIX: &str = "POLICYD__";
const ENV_JSON: &str = "POLICYD_CONFIG_JSON";
const ENV_CLI_OVERRIDES: &str = "POLICYD_CONFIG_OVERRIDES";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
    pub include_cli_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
            include_cli_env: true,
        }
    }
}

/// Defaults, then `path` (if it exists), then environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, PolicyError> {
    let mut options = LoadOptions::default();
    if let Some(p) = path {
        options.paths.push(p.to_path_buf());
    }
    options.include_env = true;
    options.include_cli_env = true;
    load_config_with_options(&options)
}

pub fn load_config_with_options(options: &LoadOptions) -> Result<EngineConfig, PolicyError> {
    let mut config = EngineConfig::default();

    for path in &options.paths {
        if path.exists() {
            let overlay = overlays_from_file(path)?;
            apply_overlays(&mut config, overlay)?;
        }
    }

    if options.include_env {
        let env_overlays = overlays_from_env()?;
        apply_overlays(&mut config, env_overlays)?;
    }

    if options.include_cli_env {
        let cli_overlays = overlays_from_cli_env();
        apply_overlays(&mut config, cli_overlays)?;
    }

    Ok(config)
}

struct ConfigOverlay {
    path: String,
    value: Value,
    source: ConfigSource,
}

fn apply_overlays(
    config: &mut EngineConfig,
    overlays: Vec<ConfigOverlay>,
) -> Result<(), PolicyError> {
    for overlay in overlays {
        config.apply_setting(&overlay.path, &overlay.value, overlay.source)?;
    }
    Ok(())
}

fn overlays_from_file(path: &Path) -> Result<Vec<ConfigOverlay>, PolicyError> {
    let content = fs::read_to_string(path)
        .map_err(|err| PolicyError::Invalid(format!("{}: {err}", path.display())))?;
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| PolicyError::Invalid(err.to_string()))?;
    let json_value =
        serde_json::to_value(yaml_value).map_err(|err| PolicyError::Invalid(err.to_string()))?;
    Ok(flatten_value(json_value, None, ConfigSource::File))
}

fn overlays_from_env() -> Result<Vec<ConfigOverlay>, PolicyError> {
    let mut overlays = Vec::new();
    for (key, raw) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let path = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            if path.is_empty() {
                continue;
            }
            overlays.push(ConfigOverlay {
                path,
                value: parse_env_value(&raw),
                source: ConfigSource::Env,
            });
        }
    }

    if let Ok(raw_json) = env::var(ENV_JSON) {
        if !raw_json.trim().is_empty() {
            let json_value: Value = serde_json::from_str(&raw_json)
                .map_err(|err| PolicyError::Invalid(format!("{ENV_JSON}: {err}")))?;
            overlays.extend(flatten_value(json_value, None, ConfigSource::Env));
        }
    }

    Ok(overlays)
}

fn overlays_from_cli_env() -> Vec<ConfigOverlay> {
    let mut overlays = Vec::new();
    if let Ok(raw) = env::var(ENV_CLI_OVERRIDES) {
        for token in raw.split(',') {
            let Some((path, value_raw)) = token.trim().split_once('=') else {
                continue;
            };
            let path = path.trim();
            if path.is_empty() {
                continue;
            }
            overlays.push(ConfigOverlay {
                path: path.to_string(),
                value: parse_env_value(value_raw.trim()),
                source: ConfigSource::Cli,
            });
        }
    }
    overlays
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

fn flatten_value(value: Value, prefix: Option<String>, source: ConfigSource) -> Vec<ConfigOverlay> {
    match value {
        Value::Object(map) => {
            let mut result = Vec::new();
            for (key, value) in map {
                let key_segment = key.trim().to_ascii_lowercase();
                let next_prefix = match &prefix {
                    Some(prefix) if !prefix.is_empty() => format!("{prefix}.{key_segment}"),
                    _ => key_segment,
                };
                result.extend(flatten_value(value, Some(next_prefix), source));
            }
            result
        }
        other => match prefix {
            Some(path) => vec![ConfigOverlay {
                path,
                value: other,
                source,
            }],
            None => Vec::new(),
        },
    }
}
