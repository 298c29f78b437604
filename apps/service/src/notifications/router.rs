use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::delivery::DeliveryQueue;
use super::rules::{AlertEvent, matching_rules};
use super::template::render;
use crate::database::Repository;
use crate::events::{IncidentEvent, IncidentEventKind};
use crate::incidents::IncidentManager;
use crate::models::{DispatchStatus, NotificationDispatch, NotificationEventType, NotificationRule, Severity};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Events at or above this severity ignore working hours
    pub always_notify_severity: Option<Severity>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { always_notify_severity: Some(Severity::Critical) }
    }
}

type CooldownKey = (Uuid, Uuid, NotificationEventType);

/// Outcome of asking for a rule's cooldown slot
enum Cooldown {
    /// The rule has no cooldown
    Free,
    /// Slot taken. `previous` is restored if the dispatch fails.
    Claimed { key: CooldownKey, previous: Option<DateTime<Utc>> },
    Active,
}

#[derive(Debug, Clone)]
struct PendingEscalation {
    rule_id: Uuid,
    escalate_to: Option<Uuid>,
    after_minutes: u32,
    due: DateTime<Utc>,
}

/// Matches events against rules and turns them into pending dispatches
pub struct NotificationRouter {
    repository: Arc<dyn Repository>,
    queue: DeliveryQueue,
    config: RouterConfig,
    /// Suppressed until, per (rule, resource, event type)
    cooldowns: Mutex<HashMap<CooldownKey, DateTime<Utc>>>,
    /// Deferred escalations per incident
    escalations: Mutex<HashMap<Uuid, Vec<PendingEscalation>>>,
}

impl NotificationRouter {
    pub fn new(repository: Arc<dyn Repository>, queue: DeliveryQueue, config: RouterConfig) -> Self {
        Self {
            repository,
            queue,
            config,
            cooldowns: Mutex::new(HashMap::new()),
            escalations: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every matching rule for `event`.
    ///
    /// A rule that already produced dispatches for the same source and event
    /// type is skipped, so replaying an event never notifies twice.
    pub async fn route(&self, event: &AlertEvent) -> Result<Vec<NotificationDispatch>> {
        let rules = matching_rules(self.repository.list_rules().await?, event);
        let previous = match event.source_id {
            Some(source_id) if !rules.is_empty() => self.repository.dispatches_for_source(source_id).await?,
            _ => Vec::new(),
        };
        let mut dispatches = Vec::new();

        for mut rule in rules {
            if previous.iter().any(|dispatch| dispatch.rule_id == rule.id && dispatch.event_type == event.event_type) {
                debug!("Rule '{}' already notified {} for this event", rule.name, event.event_type);
                continue;
            }
            if !self.within_hours(&rule, event) {
                debug!("Rule '{}' skipped {} outside working hours", rule.name, event.event_type);
                continue;
            }
            let cooldown = self.claim_cooldown(&rule, event);
            if matches!(cooldown, Cooldown::Active) {
                debug!("Rule '{}' in cooldown for {} on {}", rule.name, event.event_type, event.resource.name);
                continue;
            }

            match self.dispatch(&rule, event).await {
                Ok(created) => dispatches.extend(created),
                Err(err) => {
                    self.release_cooldown(cooldown);
                    return Err(err);
                }
            }
            self.schedule_escalation(&rule, event);

            rule.trigger_count += 1;
            rule.last_triggered_at = Some(event.at);
            self.repository.save_rule(&rule).await?;
        }

        Ok(dispatches)
    }

    /// Route an incident change and drop escalations it makes pointless
    pub async fn route_incident(&self, event: &IncidentEvent, at: DateTime<Utc>) -> Result<Vec<NotificationDispatch>> {
        if matches!(
            event.kind,
            IncidentEventKind::Acknowledged
                | IncidentEventKind::Assigned
                | IncidentEventKind::Resolved
                | IncidentEventKind::AutoResolved
                | IncidentEventKind::Closed
        ) {
            self.cancel_escalations(event.incident.id);
        }

        match AlertEvent::from_incident(event, at) {
            Some(alert) => self.route(&alert).await,
            None => Ok(Vec::new()),
        }
    }

    fn within_hours(&self, rule: &NotificationRule, event: &AlertEvent) -> bool {
        let Some(hours) = &rule.working_hours else {
            return true;
        };
        hours.contains(event.at) || self.config.always_notify_severity.is_some_and(|ceiling| event.severity >= ceiling)
    }

    /// Check and claim the cooldown slot in one step
    fn claim_cooldown(&self, rule: &NotificationRule, event: &AlertEvent) -> Cooldown {
        let Some(minutes) = rule.cooldown_minutes.filter(|minutes| *minutes > 0) else {
            return Cooldown::Free;
        };

        let key = (rule.id, event.resource.id, event.event_type);
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        if cooldowns.get(&key).is_some_and(|until| event.at < *until) {
            return Cooldown::Active;
        }
        let previous = cooldowns.insert(key, event.at + Duration::minutes(i64::from(minutes)));
        Cooldown::Claimed { key, previous }
    }

    /// Undo a claim whose dispatch was never persisted
    fn release_cooldown(&self, cooldown: Cooldown) {
        let Cooldown::Claimed { key, previous } = cooldown else {
            return;
        };
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        match previous {
            Some(until) => cooldowns.insert(key, until),
            None => cooldowns.remove(&key),
        };
    }

    /// Save one pending dispatch per recipient and queue it for delivery
    async fn dispatch(&self, rule: &NotificationRule, event: &AlertEvent) -> Result<Vec<NotificationDispatch>> {
        let message = render(rule.template.as_ref(), event);
        let recipients: Vec<Option<String>> = if rule.recipients.is_empty() {
            vec![None]
        } else {
            rule.recipients.iter().cloned().map(Some).collect()
        };

        let mut dispatches = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let dispatch = NotificationDispatch {
                id: Uuid::new_v4(),
                rule_id: rule.id,
                channel_id: rule.channel_id,
                event_type: event.event_type,
                resource_id: event.resource.id,
                incident_id: event.incident.as_ref().map(|incident| incident.id),
                source_id: event.source_id,
                recipient,
                subject: message.subject.clone(),
                body: message.body.clone(),
                status: DispatchStatus::Pending,
                retry_count: 0,
                next_retry_at: None,
                created_at: event.at,
                sent_at: None,
                failed_at: None,
                error_message: None,
                external_id: None,
            };
            self.repository.save_dispatch(&dispatch).await?;
            self.queue.enqueue(dispatch.id);
            dispatches.push(dispatch);
        }

        info!("Rule '{}' queued {} notification(s) for {}", rule.name, dispatches.len(), event.event_type);
        Ok(dispatches)
    }

    fn schedule_escalation(&self, rule: &NotificationRule, event: &AlertEvent) {
        let (Some(minutes), Some(incident)) = (rule.escalate_after_minutes, &event.incident) else {
            return;
        };
        if !incident.is_open() {
            return;
        }

        let mut escalations = self.escalations.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = escalations.entry(incident.id).or_default();
        if pending.iter().any(|escalation| escalation.rule_id == rule.id) {
            return;
        }
        pending.push(PendingEscalation {
            rule_id: rule.id,
            escalate_to: rule.escalate_to_rule_id,
            after_minutes: minutes,
            due: event.at + Duration::minutes(minutes as i64),
        });
        debug!("Escalation for incident #{} scheduled in {} minutes", incident.number, minutes);
    }

    /// Drop deferred escalations for an incident. Returns whether any existed.
    pub fn cancel_escalations(&self, incident_id: Uuid) -> bool {
        let mut escalations = self.escalations.lock().unwrap_or_else(PoisonError::into_inner);
        escalations.remove(&incident_id).is_some()
    }

    pub fn pending_escalations(&self) -> usize {
        self.escalations.lock().unwrap_or_else(PoisonError::into_inner).values().map(Vec::len).sum()
    }

    /// Fire escalations that came due. Incidents acknowledged or resolved in
    /// the meantime are skipped. Returns the escalation events for further
    /// routing and publishing.
    pub async fn sweep_escalations(&self, incidents: &IncidentManager, now: DateTime<Utc>) -> Result<Vec<IncidentEvent>> {
        self.prune_cooldowns(now);

        let due: Vec<(Uuid, PendingEscalation)> = {
            let mut escalations = self.escalations.lock().unwrap_or_else(PoisonError::into_inner);
            let mut due = Vec::new();
            for (incident_id, pending) in escalations.iter_mut() {
                let (ready, waiting): (Vec<_>, Vec<_>) = pending.drain(..).partition(|escalation| escalation.due <= now);
                *pending = waiting;
                due.extend(ready.into_iter().map(|escalation| (*incident_id, escalation)));
            }
            escalations.retain(|_, pending| !pending.is_empty());
            due
        };

        let mut events = Vec::new();
        for (incident_id, escalation) in due {
            let reason = format!("No acknowledgement within {} minutes", escalation.after_minutes);
            let Some(event) = incidents.escalate_unowned(incident_id, &reason, now).await? else {
                continue;
            };

            if let Some(target) = escalation.escalate_to {
                match self.repository.get_rule(target).await? {
                    Some(rule) if rule.enabled => {
                        if let Some(alert) = AlertEvent::from_incident(&event, now) {
                            self.dispatch(&rule, &alert).await?;
                        }
                    }
                    _ => warn!("Escalation rule {} is missing or disabled", target),
                }
            }

            events.push(event);
        }

        Ok(events)
    }

    fn prune_cooldowns(&self, now: DateTime<Utc>) {
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        cooldowns.retain(|_, until| *until > now);
    }
}
