//! Runtime configuration for the materializer and its HTTP transport.
//!
//! Defaults are read from the environment; CLI flags override them.

use serde::{Deserialize, Serialize};

/// Media type used when the environment does not override it.
pub const DEFAULT_MEDIA_TYPE: &str = "application/javascript";

/// Materializer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializerConfig {
    /// Media type attached to every published blob
    pub media_type: String,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        MaterializerConfig {
            media_type: std::env::var("DELTABLOB_MEDIA_TYPE")
                .unwrap_or_else(|_| DEFAULT_MEDIA_TYPE.to_string()),
        }
    }
}

impl MaterializerConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Set the blob media type
    pub fn with_media_type(mut self, media_type: &str) -> Self {
        self.media_type = media_type.to_string();
        self
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Whole-request timeout; `None` waits indefinitely
    pub timeout_ms: Option<u64>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        HttpTransportConfig {
            timeout_ms: std::env::var("DELTABLOB_HTTP_TIMEOUT_MS")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            user_agent: std::env::var("DELTABLOB_USER_AGENT")
                .unwrap_or_else(|_| format!("deltablob/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl HttpTransportConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Set the request timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = MaterializerConfig::from_env().with_media_type("text/plain");
        assert_eq!(config.media_type, "text/plain");

        let http = HttpTransportConfig::from_env()
            .with_timeout_ms(250)
            .with_user_agent("probe/1");
        assert_eq!(http.timeout_ms, Some(250));
        assert_eq!(http.user_agent, "probe/1");
    }
}
