//! HTTP client for the agent-execution runtime.
//!
//! Implements the AgentClient trait against a JSON-over-HTTP runtime: one
//! POST per invocation, descriptor as the request body, payload as the
//! response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::agent::{AgentClient, AgentError, TaskDescriptor};

/// API key environment variable
const API_KEY_ENV: &str = "CADENCE_AGENT_API_KEY";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the HTTP agent client
#[derive(Debug, Clone)]
pub struct HttpAgentConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpAgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpAgentConfig {
    /// Create a config pointed at a specific runtime URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// HTTP-backed agent client
pub struct HttpAgentClient {
    client: Client,
    api_key: Option<String>,
    config: HttpAgentConfig,
}

impl HttpAgentClient {
    /// Create a new client
    ///
    /// Reads CADENCE_AGENT_API_KEY from the environment if set; the key is
    /// optional because local runtimes typically run unauthenticated.
    pub fn new(config: HttpAgentConfig) -> std::result::Result<Self, AgentError> {
        let api_key = std::env::var(API_KEY_ENV).ok();
        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(
        api_key: Option<String>,
        config: HttpAgentConfig,
    ) -> std::result::Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn invoke_url(&self) -> String {
        format!("{}/invoke", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(&self, descriptor: &TaskDescriptor) -> std::result::Result<Value, AgentError> {
        let mut request = self.client.post(self.invoke_url()).json(descriptor);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout(self.config.timeout)
            } else {
                AgentError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::OK => response
                .json::<Value>()
                .await
                .map_err(|e| AgentError::BadPayload(e.to_string())),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(AgentError::Refused(body))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AgentError::Transport(format!("HTTP {}: {}", status, body)))
            }
        }
    }
}
