use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PolicyError;

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub reconcile: ReconcileConfig,
    pub canonical: CanonicalConfig,
    pub notifier: NotifierConfig,
    pub provenance: BTreeMap<String, ConfigSource>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileConfig {
    pub interval: Duration,
    pub heal_backoff: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalConfig {
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotifierConfig {
    pub publish_attempts: u32,
    pub publish_backoff: Duration,
    pub publish_on_mutation: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigSource {
    Builtin,
    File,
    Env,
    Cli,
}

pub const SETTING_KEYS: [&str; 6] = [
    "reconcile.interval",
    "reconcile.heal_backoff",
    "canonical.timeout",
    "notifier.publish_attempts",
    "notifier.publish_backoff",
    "notifier.publish_on_mutation",
];

impl Default for EngineConfig {
    fn default() -> Self {
        let mut config = Self {
            reconcile: ReconcileConfig {
                interval: Duration::from_secs(5 * 60),
                heal_backoff: Duration::from_secs(10),
            },
            canonical: CanonicalConfig {
                timeout: Duration::from_secs(30),
            },
            notifier: NotifierConfig {
                publish_attempts: 3,
                publish_backoff: Duration::from_millis(200),
                publish_on_mutation: true,
            },
            provenance: BTreeMap::new(),
        };
        for key in SETTING_KEYS {
            config.provenance.insert(key.to_string(), ConfigSource::Builtin);
        }
        config
    }
}

impl EngineConfig {
    /// Current value of every setting rendered for display.
    pub fn describe(&self) -> Vec<(String, String, ConfigSource)> {
        SETTING_KEYS
            .iter()
            .map(|key| {
                let value = match *key {
                    "reconcile.interval" => {
                        humantime::format_duration(self.reconcile.interval).to_string()
                    }
                    "reconcile.heal_backoff" => {
                        humantime::format_duration(self.reconcile.heal_backoff).to_string()
                    }
                    "canonical.timeout" => {
                        humantime::format_duration(self.canonical.timeout).to_string()
                    }
                    "notifier.publish_attempts" => self.notifier.publish_attempts.to_string(),
                    "notifier.publish_backoff" => {
                        humantime::format_duration(self.notifier.publish_backoff).to_string()
                    }
                    _ => self.notifier.publish_on_mutation.to_string(),
                };
                let source = self
                    .provenance
                    .get(*key)
                    .copied()
                    .unwrap_or(ConfigSource::Builtin);
                (key.to_string(), value, source)
            })
            .collect()
    }

    pub(crate) fn apply_setting(
        &mut self,
        path: &str,
        value: &Value,
        source: ConfigSource,
    ) -> Result<(), PolicyError> {
        match path {
            "reconcile.interval" => self.reconcile.interval = to_positive_duration(path, value)?,
            "reconcile.heal_backoff" => {
                self.reconcile.heal_backoff = to_positive_duration(path, value)?
            }
            "canonical.timeout" => self.canonical.timeout = to_positive_duration(path, value)?,
            "notifier.publish_attempts" => {
                self.notifier.publish_attempts = to_u32(value)?.max(1)
            }
            "notifier.publish_backoff" => self.notifier.publish_backoff = to_duration(value)?,
            "notifier.publish_on_mutation" => {
                self.notifier.publish_on_mutation = to_bool(value)?
            }
            path => {
                return Err(PolicyError::Invalid(format!(
                    "unsupported config path: {path}"
                )))
            }
        }
        self.provenance.insert(path.to_string(), source);
        Ok(())
    }
}

fn to_duration(value: &Value) -> Result<Duration, PolicyError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| PolicyError::Invalid(format!("expected milliseconds, got {value}"))),
        Value::String(raw) => humantime::parse_duration(raw)
            .map_err(|err| PolicyError::Invalid(format!("invalid duration '{raw}': {err}"))),
        other => Err(PolicyError::Invalid(format!(
            "expected duration, got {other}"
        ))),
    }
}

fn to_positive_duration(path: &str, value: &Value) -> Result<Duration, PolicyError> {
    let duration = to_duration(value)?;
    if duration.is_zero() {
        return Err(PolicyError::Invalid(format!("{path} must be greater than zero")));
    }
    Ok(duration)
}

fn to_u32(value: &Value) -> Result<u32, PolicyError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| PolicyError::Invalid(format!("expected integer, got {value}")))
}

fn to_bool(value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::Invalid(format!("expected bool, got {value}")))
}
