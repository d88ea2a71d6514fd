//! Configuration module for environment variables

use std::env;
use url::Url;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Log level (default: info)
    pub log_level: String,
    /// Authoritative backend base URL used by the relay (API_BASE_URL)
    pub api_base_url: Option<String>,
    /// Client-mirrored backend base URL (PUBLIC_API_BASE_URL)
    pub public_api_base_url: Option<String>,
    /// Maximum diagnostics request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_base_url: non_empty(env::var("API_BASE_URL").ok()),
            public_api_base_url: non_empty(env::var("PUBLIC_API_BASE_URL").ok()),
            max_request_body_size: env::var("MAX_REQUEST_BODY_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024), // 10MB
        }
    }

    /// Backend base the relay forwards to: the server-side value wins over
    /// the public mirror.
    pub fn relay_base(&self) -> Option<&str> {
        self.api_base_url
            .as_deref()
            .or(self.public_api_base_url.as_deref())
    }

    /// Backend base for diagnostics runs when the operator gives no override.
    pub fn diagnostics_base(&self) -> Option<&str> {
        self.public_api_base_url
            .as_deref()
            .or(self.api_base_url.as_deref())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            api_base_url: None,
            public_api_base_url: None,
            max_request_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Request Executor configuration.
///
/// `origin` is the page origin the client runs under. When it is `None` the
/// executor behaves as a server-side caller: no relay routing, no same-origin
/// collapsing and no relay fallback.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api_base: Option<String>,
    pub origin: Option<Url>,
}

impl ClientConfig {
    pub fn new(api_base: Option<&str>, origin: Option<Url>) -> Self {
        Self {
            api_base: non_empty(api_base.map(str::to_string)),
            origin,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_prefers_server_side_base() {
        let config = Config {
            api_base_url: Some("http://internal:8000/api".into()),
            public_api_base_url: Some("https://public.example.com/api".into()),
            ..Config::default()
        };
        assert_eq!(config.relay_base(), Some("http://internal:8000/api"));
        assert_eq!(config.diagnostics_base(), Some("https://public.example.com/api"));
    }

    #[test]
    fn relay_falls_back_to_public_base() {
        let config = Config {
            public_api_base_url: Some("https://public.example.com/api".into()),
            ..Config::default()
        };
        assert_eq!(config.relay_base(), Some("https://public.example.com/api"));
    }

    #[test]
    fn blank_client_base_is_treated_as_unset() {
        let config = ClientConfig::new(Some("   "), None);
        assert!(config.api_base.is_none());
    }
}
