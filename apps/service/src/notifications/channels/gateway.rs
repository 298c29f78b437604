//! Email and SMS through provider HTTP APIs.
//!
//! Both speak a small JSON contract (`from`, `to`, message fields, bearer
//! key) that transactional mail and SMS gateways commonly accept.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChannelAdapter, DeliveryOutcome, OutboundMessage, channel_config, ensure_success, recipient_or};
use crate::models::NotificationChannel;

#[derive(Debug, Deserialize)]
struct GatewayConfig {
    url: String,
    #[serde(default)]
    api_key: Option<String>,
    from: String,
    /// Used when the rule has no recipients
    #[serde(default)]
    to: Option<String>,
}

/// Provider message id from common response shapes
fn message_id(answer: &Value) -> Option<String> {
    ["id", "message_id", "messageId", "sid"]
        .iter()
        .find_map(|key| answer.get(key))
        .map(|id| match id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        })
}

async fn post_gateway(
    client: &reqwest::Client,
    provider: &str,
    config: &GatewayConfig,
    payload: Value,
) -> Result<Option<String>> {
    let mut request = client.post(&config.url).json(&payload);
    if let Some(key) = &config.api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.with_context(|| format!("{} request failed", provider))?;
    let response = ensure_success(provider, response).await?;
    let answer: Value = response.json().await.unwrap_or(Value::Null);
    Ok(message_id(&answer))
}

pub struct EmailAdapter {
    client: reqwest::Client,
}

impl EmailAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: GatewayConfig = channel_config(channel)?;
        let to = recipient_or(message, config.to.as_deref(), "email recipient")?;
        let payload = json!({
            "from": config.from,
            "to": [to],
            "subject": message.subject,
            "text": message.body,
        });
        post_gateway(&self.client, "Email API", &config, payload).await
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}

pub struct SmsAdapter {
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: GatewayConfig = channel_config(channel)?;
        let to = recipient_or(message, config.to.as_deref(), "phone number")?;
        // SMS carries the subject line only
        let payload = json!({
            "from": config.from,
            "to": to,
            "text": message.subject,
        });
        post_gateway(&self.client, "SMS gateway", &config, payload).await
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}
