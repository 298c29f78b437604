use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

use super::{ChannelAdapter, DeliveryOutcome, OutboundMessage, channel_config, ensure_success};
use crate::models::NotificationChannel;

pub const SIGNATURE_HEADER: &str = "X-Vigil-Signature";

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    /// Signs the body with HMAC-SHA256 when set
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    recipient: Option<&'a str>,
    metadata: &'a BTreeMap<String, String>,
}

/// `sha256=<hex>` signature of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).context("Invalid webhook secret")?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Generic JSON webhook
pub struct WebhookAdapter {
    client: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: WebhookConfig = channel_config(channel)?;
        let payload = WebhookPayload {
            subject: &message.subject,
            body: &message.body,
            recipient: message.recipient.as_deref(),
            metadata: &message.metadata,
        };
        let body = serde_json::to_vec(&payload)?;

        let mut request = self.client.post(&config.url).header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(secret) = &config.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &body)?);
        }

        let response = request.body(body).send().await.context("Webhook request failed")?;
        ensure_success("Webhook", response).await?;
        Ok(None)
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}
