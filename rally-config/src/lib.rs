pub mod config;
#[cfg(feature = "http")]
pub mod http;

pub use config::{
    CacheSettings, ConfigError, Configurable, HttpSettings, QueueSettings,
    RallyConfig, RetrySettings,
};
