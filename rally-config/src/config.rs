use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{self, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

pub trait Configurable {
    fn config(&self) -> &serde_yaml::Value;

    // read configuration from yaml config
    fn load_config(
        config_file_path: impl AsRef<path::Path>,
    ) -> Result<serde_yaml::Value, ConfigError> {
        let content: String = fs::read_to_string(config_file_path)?;
        let config: serde_yaml::Value = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Extract Value from config using dot notation, i.e.
    /// "rally.queue.network_pool_size"
    fn get_config_value(&self, key: &str) -> Option<&serde_yaml::Value> {
        let keys: Vec<&str> = key.split('.').collect();
        Self::get_value_recursive(self.config(), &keys)
    }

    fn get_value_recursive<'a>(
        config: &'a serde_yaml::Value,
        keys: &[&str],
    ) -> Option<&'a serde_yaml::Value> {
        let (key, remaining_keys) = keys.split_first()?;
        match config {
            serde_yaml::Value::Mapping(map) => {
                let value = map.get(serde_yaml::Value::String(key.to_string()))?;
                if remaining_keys.is_empty() {
                    Some(value)
                } else {
                    Self::get_value_recursive(value, remaining_keys)
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Number of network dispatcher tasks
    pub network_pool_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            network_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 2500,
            max_retries: 1,
            backoff_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Root of the disk cache; memory only when unset
    pub directory: Option<PathBuf>,
    pub max_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: None,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole request timeout, seconds
    pub timeout: u64,
    /// Connect timeout, seconds
    pub connect_timeout: u64,
    pub user_agent: String,
    pub slow_request_threshold_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: 30,
            connect_timeout: 10,
            user_agent: concat!("rally/", env!("CARGO_PKG_VERSION")).to_string(),
            slow_request_threshold_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Sections {
    queue: QueueSettings,
    retry: RetrySettings,
    cache: CacheSettings,
    http: HttpSettings,
}

/// Settings read from the `rally:` key of a YAML document. Missing sections and
/// fields fall back to their defaults; the whole document stays available for
/// dot-path lookups through [`Configurable`].
#[derive(Debug, Clone, Default)]
pub struct RallyConfig {
    raw: serde_yaml::Value,
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub http: HttpSettings,
}

impl Configurable for RallyConfig {
    fn config(&self) -> &serde_yaml::Value {
        &self.raw
    }
}

impl RallyConfig {
    pub fn from_file(
        config_file_path: impl AsRef<path::Path>,
    ) -> Result<Self, ConfigError> {
        let raw = Self::load_config(config_file_path)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: serde_yaml::Value) -> Result<Self, ConfigError> {
        let sections = match raw.get("rally") {
            Some(section) if !section.is_null() => {
                serde_yaml::from_value::<Sections>(section.clone())?
            }
            _ => {
                tracing::debug!("no `rally` section in config, using defaults");
                Sections::default()
            }
        };

        Ok(Self {
            raw,
            queue: sections.queue,
            retry: sections.retry,
            cache: sections.cache,
            http: sections.http,
        })
    }
}
