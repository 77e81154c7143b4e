//! `reqwest`-backed transport for fetching change descriptions.

use std::time::Duration;

use async_trait::async_trait;
use deltablob_state::{StateError, StateResult, Transport};
use tracing::debug;

use crate::config::HttpTransportConfig;

/// HTTP transport. Non-2xx answers are reported as `StateError::HttpStatus`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from `config`.
    pub fn new(config: &HttpTransportConfig) -> StateResult<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().map_err(|err| StateError::Transport {
            locator: String::new(),
            reason: format!("failed to build HTTP client: {err}"),
        })?;
        Ok(Self { client })
    }

    /// Create a transport from environment variables
    pub fn from_env() -> StateResult<Self> {
        Self::new(&HttpTransportConfig::from_env())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, locator: &str) -> StateResult<Vec<u8>> {
        let transport_err = |err: reqwest::Error| StateError::Transport {
            locator: locator.to_string(),
            reason: err.to_string(),
        };

        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StateError::HttpStatus {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport_err)?;
        debug!(locator = %locator, bytes = body.len(), "change description fetched");
        Ok(body.to_vec())
    }
}
