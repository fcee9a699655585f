use detour_common::protocol::error::{DetourError, Result};
use detour_common::{ControlMessage, ControlReply, DomainStatus};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Path of the control endpoint on an agent.
const CONTROL_PATH: &str = "/__detour/control";

/// Sweeps wait on every probe, so the default leaves room for slow ones.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends control messages to a running agent over HTTP.
#[derive(Debug, Clone)]
pub struct ControlClient {
    endpoint: String,
    http: reqwest::Client,
}

impl ControlClient {
    /// Creates a client for the agent at `agent_url`.
    ///
    /// The URL must carry an `http://` or `https://` prefix.
    pub fn new(agent_url: &str) -> Result<Self> {
        Self::with_timeout(agent_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Arguments
    /// * `agent_url` - Base URL of the agent (e.g., "http://127.0.0.1:8080")
    /// * `timeout` - Limit for a whole control round trip
    ///
    /// # Returns
    /// - `Ok(ControlClient)` - Client targeting `{agent_url}/__detour/control`
    /// - `Err(DetourError::InvalidUrl)` - The URL lacks an http(s) prefix
    pub fn with_timeout(agent_url: &str, timeout: Duration) -> Result<Self> {
        if !agent_url.starts_with("http://") && !agent_url.starts_with("https://") {
            return Err(DetourError::InvalidUrl(format!(
                "agent URL must start with http:// or https://: {}",
                agent_url
            )));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: format!("{}{}", agent_url.trim_end_matches('/'), CONTROL_PATH),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends a message and returns the raw reply.
    ///
    /// `FORCE_ACTIVATE` carries no reply and resolves to `None`. Replies of
    /// the form `{error}` are returned as-is; only transport failures and
    /// unparseable bodies are errors.
    pub async fn send(&self, message: ControlMessage) -> Result<Option<ControlReply>> {
        debug!("Sending {:?} to {}", message, self.endpoint);

        let response = self.http.post(&self.endpoint).json(&message).send().await?;
        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(None);
        }

        let body = response.bytes().await?;
        match serde_json::from_slice::<ControlReply>(&body) {
            Ok(reply) => Ok(Some(reply)),
            Err(_) => Err(DetourError::Http(format!(
                "agent answered {} with {}",
                status,
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    /// Version tag of the agent.
    pub async fn version(&self) -> Result<String> {
        match self.expect_reply(ControlMessage::VersionQuery).await? {
            ControlReply::Version { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Fresh availability of every candidate, in priority order.
    pub async fn sweep(&self) -> Result<Vec<DomainStatus>> {
        match self.expect_reply(ControlMessage::EndpointSweep).await? {
            ControlReply::Sweep { domains } => Ok(domains),
            other => Err(unexpected(other)),
        }
    }

    /// Clears the agent's health records and caches.
    pub async fn purge(&self) -> Result<()> {
        match self.expect_reply(ControlMessage::Purge).await? {
            ControlReply::Purge { success: true, .. } => Ok(()),
            ControlReply::Purge { error, .. } => Err(DetourError::Storage(
                error.unwrap_or_else(|| "purge failed".to_string()),
            )),
            other => Err(unexpected(other)),
        }
    }

    /// Asks the agent to activate its version immediately.
    pub async fn force_activate(&self) -> Result<()> {
        self.send(ControlMessage::ForceActivate).await?;
        Ok(())
    }

    async fn expect_reply(&self, message: ControlMessage) -> Result<ControlReply> {
        match self.send(message).await? {
            Some(ControlReply::Error { error }) => Err(DetourError::Http(error)),
            Some(reply) => Ok(reply),
            None => Err(DetourError::Http(format!("no reply to {:?}", message))),
        }
    }
}

fn unexpected(reply: ControlReply) -> DetourError {
    DetourError::Http(format!("unexpected reply: {:?}", reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_http_prefix() {
        assert!(matches!(
            ControlClient::new("127.0.0.1:8080"),
            Err(DetourError::InvalidUrl(_))
        ));
        assert!(ControlClient::new("https://agent.example").is_ok());
    }

    #[test]
    fn test_endpoint_joins_control_path() {
        let client = ControlClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8080/__detour/control");
    }

    #[test]
    fn test_client_is_clonable() {
        let client = ControlClient::new("http://127.0.0.1:8080").unwrap();
        let client2 = client.clone();
        assert_eq!(client.endpoint(), client2.endpoint());
    }
}
