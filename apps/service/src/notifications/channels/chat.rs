use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChannelAdapter, DeliveryOutcome, OutboundMessage, channel_config, ensure_success, recipient_or};
use crate::models::NotificationChannel;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct IncomingWebhookConfig {
    webhook_url: String,
}

/// Slack incoming webhook
pub struct SlackAdapter {
    client: reqwest::Client,
}

impl SlackAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: IncomingWebhookConfig = channel_config(channel)?;
        let payload = json!({ "text": format!("*{}*\n{}", message.subject, message.body) });

        let response = self.client.post(&config.webhook_url).json(&payload).send().await.context("Slack request failed")?;
        ensure_success("Slack", response).await?;
        Ok(None)
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}

/// Microsoft Teams incoming webhook
pub struct TeamsAdapter {
    client: reqwest::Client,
}

impl TeamsAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: IncomingWebhookConfig = channel_config(channel)?;
        let payload = json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "title": message.subject,
            "text": message.body.replace('\n', "<br>"),
        });

        let response = self.client.post(&config.webhook_url).json(&payload).send().await.context("Teams request failed")?;
        ensure_success("Teams", response).await?;
        Ok(None)
    }
}

#[async_trait]
impl ChannelAdapter for TeamsAdapter {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.post(channel, message).await.into()
    }
}

#[derive(Debug, Deserialize)]
struct TelegramConfig {
    bot_token: String,
    /// Used when the rule has no recipients
    #[serde(default)]
    chat_id: Option<String>,
    /// Overrides the public Bot API endpoint
    #[serde(default)]
    api_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

/// Telegram Bot API `sendMessage`
pub struct TelegramAdapter {
    client: reqwest::Client,
}

impl TelegramAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(&self, channel: &NotificationChannel, message: &OutboundMessage) -> Result<Option<String>> {
        let config: TelegramConfig = channel_config(channel)?;
        let chat_id = recipient_or(message, config.chat_id.as_deref(), "Telegram chat id")?;
        let base = config.api_url.as_deref().unwrap_or(TELEGRAM_API).trim_end_matches('/');
        let url = format!("{}/bot{}/sendMessage", base, config.bot_token);
        let payload = json!({
            "chat_id": chat_id,
            "text": format!("{}\n\n{}", message.subject, message.body),
            "disable_web_page_preview": true,
        });

        let response = self.client.post(url).json(&payload).send().await.context("Telegram request failed")?;
        let answer: TelegramResponse = ensure_success("Telegram", response).await?.json().await?;
        if !answer.ok {
            anyhow::bail!("Telegram rejected the message: {}", answer.description.unwrap_or_default());
        }

        Ok(answer.result.map(|message| message.message_id.to_string()))
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
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

    fn channel(kind: ChannelKind, config: serde_json::Value) -> NotificationChannel {
        NotificationChannel { id: Uuid::new_v4(), name: "chat".into(), kind, enabled: true, config }
    }

    fn message(recipient: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            recipient: recipient.map(str::to_string),
            subject: "Check DOWN: api".into(),
            body: "Timed out".into(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_slack_posts_text() {
        let (url, server) = capture_one(200, "ok").await;
        let adapter = SlackAdapter::new(reqwest::Client::new());

        let outcome = adapter.send(&channel(ChannelKind::Slack, json!({ "webhook_url": url })), &message(None)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { external_id: None });
        assert!(server.await.unwrap().contains("*Check DOWN: api*"));
    }

    #[tokio::test]
    async fn test_telegram_returns_message_id() {
        let (url, server) = capture_one(200, r#"{"ok":true,"result":{"message_id":42}}"#).await;
        let adapter = TelegramAdapter::new(reqwest::Client::new());
        let config = json!({ "bot_token": "123:abc", "chat_id": "-100", "api_url": url });

        let outcome = adapter.send(&channel(ChannelKind::Telegram, config), &message(Some("777"))).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { external_id: Some("42".into()) });

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains("\"chat_id\":\"777\""));
    }

    #[tokio::test]
    async fn test_telegram_without_chat_fails() {
        let adapter = TelegramAdapter::new(reqwest::Client::new());

        let outcome = adapter.send(&channel(ChannelKind::Telegram, json!({ "bot_token": "t" })), &message(None)).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed(reason) if reason.contains("chat id")));
    }
}
