//! reqwest client construction from [`HttpSettings`].
//!
//! ```no_run
//! use rally_config::{RallyConfig, http::{HttpClientParams, build_http_client}};
//!
//! let config = RallyConfig::from_file("rally.yml").unwrap();
//! let params = HttpClientParams::from_settings(&config.http);
//! let client = build_http_client(params).unwrap();
//! ```
use crate::HttpSettings;
use std::time::Duration;

/// Parameters for configuring an HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientParams<'a> {
    /// Whole request timeout, seconds
    pub timeout: u64,
    /// Connect timeout, seconds
    pub connect_timeout: u64,
    pub user_agent: &'a str,
}

impl<'a> HttpClientParams<'a> {
    pub fn from_settings(settings: &'a HttpSettings) -> Self {
        Self {
            timeout: settings.timeout,
            connect_timeout: settings.connect_timeout,
            user_agent: &settings.user_agent,
        }
    }
}

/// Builds a rustls backed client. Per-attempt deadlines are applied on top of
/// `timeout` by the caller, so `timeout` acts as an upper bound.
pub fn build_http_client(
    params: HttpClientParams,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(params.timeout))
        .connect_timeout(Duration::from_secs(params.connect_timeout))
        .user_agent(params.user_agent)
        .build()
}
