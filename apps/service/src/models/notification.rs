use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::resource::Severity;

/// Events a notification rule can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationEventType {
    HostDown,
    HostUp,
    HostWarning,
    HostMaintenanceStarted,
    HostMaintenanceEnded,
    ServiceDown,
    ServiceUp,
    ServiceWarning,
    CheckFailed,
    CheckRecovered,
    CheckSlowResponse,
    IncidentCreated,
    IncidentAcknowledged,
    IncidentAssigned,
    IncidentEscalated,
    IncidentResolved,
    IncidentClosed,
    IncidentReopened,
    SlaResponseBreached,
    SlaResolutionBreached,
}

impl fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delivery window in a fixed UTC offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"; a window ending before it starts wraps past midnight
    pub end: String,
    /// Allowed weekdays, 0 = Sunday … 6 = Saturday. Empty means every day.
    #[serde(default)]
    pub days: Vec<u32>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl WorkingHours {
    /// Whether `now` falls inside the window.
    ///
    /// A window that cannot be parsed never blocks delivery.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes * 60) else {
            return true;
        };
        let (Ok(start), Ok(end)) =
            (NaiveTime::parse_from_str(&self.start, "%H:%M"), NaiveTime::parse_from_str(&self.end, "%H:%M"))
        else {
            return true;
        };

        let local = now.with_timezone(&offset);
        if !self.days.is_empty() && !self.days.contains(&local.weekday().num_days_from_sunday()) {
            return false;
        }

        let current = local.time();
        if start <= end { current >= start && current <= end } else { current >= start || current <= end }
    }
}

/// Optional message template. `{{placeholder}}` tokens are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub event_types: Vec<NotificationEventType>,
    /// Minimum severity; `None` matches everything
    #[serde(default)]
    pub min_severity: Option<Severity>,

    #[serde(default)]
    pub customer_ids: Vec<Uuid>,
    #[serde(default)]
    pub host_ids: Vec<Uuid>,
    #[serde(default)]
    pub check_ids: Vec<Uuid>,
    /// Matches when any tag is shared with the resource
    #[serde(default)]
    pub tags: Vec<String>,

    pub channel_id: Uuid,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub template: Option<MessageTemplate>,

    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
    #[serde(default)]
    pub working_hours: Option<WorkingHours>,
    #[serde(default)]
    pub escalate_after_minutes: Option<u32>,
    #[serde(default)]
    pub escalate_to_rule_id: Option<Uuid>,
    /// Higher values are evaluated first
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl NotificationRule {
    pub fn new(name: impl Into<String>, event_types: Vec<NotificationEventType>, channel_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            event_types,
            min_severity: None,
            customer_ids: Vec::new(),
            host_ids: Vec::new(),
            check_ids: Vec::new(),
            tags: Vec::new(),
            channel_id,
            recipients: Vec::new(),
            template: None,
            cooldown_minutes: None,
            working_hours: None,
            escalate_after_minutes: None,
            escalate_to_rule_id: None,
            priority: 0,
            trigger_count: 0,
            last_triggered_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Webhook,
    Telegram,
    Slack,
    Teams,
    Pushover,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Slack => "slack",
            ChannelKind::Teams => "teams",
            ChannelKind::Pushover => "pushover",
        };
        f.write_str(name)
    }
}

/// A configured destination. `config` is opaque to the router and parsed by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// Log entry for one delivery attempt chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDispatch {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub channel_id: Uuid,
    pub event_type: NotificationEventType,
    pub resource_id: Uuid,
    pub incident_id: Option<Uuid>,
    /// Transition the alert came from, for replay dedup
    #[serde(default)]
    pub source_id: Option<Uuid>,
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub status: DispatchStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub external_id: Option<String>,
}
