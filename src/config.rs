// Client configuration: where the backend lives and how long to wait for it

use std::time::Duration;

use crate::error::{ChatError, Result};

pub const DEFAULT_SERVER: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL for the request/response API, without trailing slash.
    pub api_base: String,
    /// Base URL for the live channel (`ws://` or `wss://`).
    pub ws_base: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Derive both endpoints from the server's HTTP URL.
    pub fn from_server_url(server: &str) -> Result<Self> {
        let api_base = server.trim().trim_end_matches('/').to_string();

        let ws_base = if let Some(rest) = api_base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api_base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ChatError::Config(format!(
                "server URL must start with http:// or https://, got '{}'",
                server
            )));
        };

        if ws_base.ends_with("://") {
            return Err(ChatError::Config(format!("server URL '{}' has no host", server)));
        }

        Ok(ClientConfig {
            api_base,
            ws_base,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Connection target for `identity`'s live channel.
    pub fn chat_socket_url(&self, identity: &str) -> String {
        format!("{}/ws/chat/{}", self.ws_base, urlencoding::encode(identity))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_base: DEFAULT_SERVER.to_string(),
            ws_base: "ws://localhost:8000".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
