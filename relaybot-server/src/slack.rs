use async_trait::async_trait;
use relaybot_core::{Config, RelayError, Result, SlackConfig};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for chat-facing messages
#[async_trait]
pub trait ChatRelay: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Posts to one channel through Slack's `chat.postMessage`
pub struct SlackRelay {
    client: Client,
    api_url: String,
    token: String,
    channel: String,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

impl SlackRelay {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let channel = config
            .channel
            .clone()
            .ok_or_else(|| RelayError::Config("GROUP_ID_SLACK is required".to_string()))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Chat(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            token: config.token.clone(),
            channel,
        })
    }
}

#[async_trait]
impl ChatRelay for SlackRelay {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/chat.postMessage", self.api_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "channel": self.channel, "text": text }))
            .send()
            .await
            .map_err(|e| RelayError::Chat(format!("Failed to reach Slack: {}", e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Chat(format!(
                "Slack responded with HTTP {}",
                response.status()
            )));
        }

        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Chat(format!("Unreadable Slack response: {}", e)))?;

        if !body.ok {
            return Err(RelayError::Chat(format!(
                "Slack rejected message: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        info!(ts = ?body.ts, "Message sent to Slack");
        Ok(())
    }
}

/// Writes messages to the log; used when no Slack token is configured
pub struct LogRelay;

#[async_trait]
impl ChatRelay for LogRelay {
    async fn send(&self, text: &str) -> Result<()> {
        info!(message = %text, "Chat message");
        Ok(())
    }
}

pub fn relay_from_config(config: &Config) -> Result<Arc<dyn ChatRelay>> {
    match &config.slack {
        Some(slack) => Ok(Arc::new(SlackRelay::new(slack)?)),
        None => {
            info!("TOKEN_SLACK not set, chat messages go to the log");
            Ok(Arc::new(LogRelay))
        }
    }
}
