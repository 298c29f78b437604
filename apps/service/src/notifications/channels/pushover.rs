use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChannelAdapter, DeliveryOutcome, OutboundMessage, channel_config, ensure_success, recipient_or};
use crate::models::NotificationChannel;

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Deserialize)]
struct PushoverConfig {
    app_token: String,
    #[serde(default)]
    user_key: Option<String>,
    /// -2 (lowest) to 2 (emergency)
    #[serde(default)]
    priority: i8,
    #[serde(default)]
    api_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushoverResponse {
    status: i32,
    request: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

pub struct PushoverAdapter {
    client: reqwest::Client,
}

impl PushoverAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: PushoverConfig = channel_config(channel)?;
        let user = recipient_or(message, config.user_key.as_deref(), "Pushover user key")?;

        let mut payload = json!({
            "token": config.app_token,
            "user": user,
            "title": message.subject,
            "message": message.body,
            "priority": config.priority.clamp(-2, 2),
        });
        // Emergency priority requires retry parameters
        if config.priority >= 2 {
            payload["retry"] = json!(60);
            payload["expire"] = json!(3600);
        }

        let url = config.api_url.as_deref().unwrap_or(PUSHOVER_API);
        let response = self.client.post(url).json(&payload).send().await.context("Pushover request failed")?;
        let answer: PushoverResponse = ensure_success("Pushover", response).await?.json().await?;
        if answer.status != 1 {
            anyhow::bail!("Pushover rejected the message: {}", answer.errors.join(", "));
        }

        Ok(answer.request)
    }
}

#[async_trait]
impl ChannelAdapter for PushoverAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelKind;
    use crate::notifications::channels::testing::capture_one;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_pushover_request_id_is_external_id() {
        let (url, server) = capture_one(200, r#"{"status":1,"request":"5042853c"}"#).await;
        let adapter = PushoverAdapter::new(reqwest::Client::new());
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name: "on-call".into(),
            kind: ChannelKind::Pushover,
            enabled: true,
            config: json!({ "app_token": "app", "user_key": "user", "priority": 2, "api_url": url }),
        };
        let message = OutboundMessage {
            recipient: None,
            subject: "Host DOWN: db-01".into(),
            body: "No heartbeat".into(),
            metadata: BTreeMap::new(),
        };

        let outcome = adapter.send(&channel, &message).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { external_id: Some("5042853c".into()) });

        let request = server.await.unwrap();
        assert!(request.contains("\"user\":\"user\""));
        assert!(request.contains("\"expire\":3600"));
    }
}
