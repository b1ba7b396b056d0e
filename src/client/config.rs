use crate::retry::RetryConfig;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const BASE_URL_ENV: &str = "CHAT_API_BASE_URL";
pub const TOKEN_ENV: &str = "CHAT_API_TOKEN";

/// Where the backend lives and how to talk to it.
///
/// Only the connect phase has a timeout: a streamed reply may legitimately
/// stay open for minutes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Bearer token. Held in memory only.
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `CHAT_API_BASE_URL` and `CHAT_API_TOKEN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            config = config.with_base_url(url);
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }
        config
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
