//! Channel adapters.
//!
//! Every destination implements the same contract: take a rendered message,
//! try to hand it to the provider, and report delivered or failed. Channel
//! configuration is opaque JSON that only the adapter understands.

pub mod chat;
pub mod gateway;
pub mod pushover;
pub mod webhook;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ChannelKind, NotificationChannel};

pub use chat::{SlackAdapter, TeamsAdapter, TelegramAdapter};
pub use gateway::{EmailAdapter, SmsAdapter};
pub use pushover::PushoverAdapter;
pub use webhook::WebhookAdapter;

/// A rendered message ready for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the provider; `external_id` is the provider's message id
    Delivered { external_id: Option<String> },
    Failed(String),
}

impl From<Result<Option<String>>> for DeliveryOutcome {
    fn from(result: Result<Option<String>>) -> Self {
        match result {
            Ok(external_id) => DeliveryOutcome::Delivered { external_id },
            Err(e) => DeliveryOutcome::Failed(format!("{:#}", e)),
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome;
}

/// Adapters keyed by channel kind
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with an HTTP adapter for every channel kind
    pub fn with_defaults(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build notification HTTP client")?;

        let mut registry = Self::empty();
        registry.register(ChannelKind::Webhook, Arc::new(WebhookAdapter::new(client.clone())));
        registry.register(ChannelKind::Slack, Arc::new(SlackAdapter::new(client.clone())));
        registry.register(ChannelKind::Teams, Arc::new(TeamsAdapter::new(client.clone())));
        registry.register(ChannelKind::Telegram, Arc::new(TelegramAdapter::new(client.clone())));
        registry.register(ChannelKind::Pushover, Arc::new(PushoverAdapter::new(client.clone())));
        registry.register(ChannelKind::Email, Arc::new(EmailAdapter::new(client.clone())));
        registry.register(ChannelKind::Sms, Arc::new(SmsAdapter::new(client)));
        Ok(registry)
    }

    pub fn register(&mut self, kind: ChannelKind, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

/// Parse a channel's opaque configuration into the adapter's own shape
pub(crate) fn channel_config<T: DeserializeOwned>(channel: &NotificationChannel) -> Result<T> {
    serde_json::from_value(channel.config.clone())
        .with_context(|| format!("Invalid configuration for {} channel '{}'", channel.kind, channel.name))
}

/// Turn a non-2xx provider answer into an error carrying a short body excerpt
pub(crate) async fn ensure_success(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    bail!("{} returned HTTP {}: {}", provider, status.as_u16(), excerpt)
}

/// Recipient from the dispatch, or the channel default
pub(crate) fn recipient_or(message: &OutboundMessage, fallback: Option<&str>, what: &str) -> Result<String> {
    message
        .recipient
        .as_deref()
        .or(fallback)
        .map(str::to_string)
        .with_context(|| format!("No {} configured for this notification", what))
}
