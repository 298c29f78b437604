use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::{IncidentEvent, transition_event_type, transition_severity};
use crate::models::{
    Incident, NotificationEventType, NotificationRule, ResourceKind, ResourceRef, Severity, Status, StatusTransition,
};

/// Something the router may notify about
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub event_type: NotificationEventType,
    pub severity: Severity,
    pub resource: ResourceRef,
    pub previous_status: Option<Status>,
    pub status: Option<Status>,
    pub incident: Option<Incident>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
    /// Status transition behind the alert, if any
    pub source_id: Option<Uuid>,
}

impl AlertEvent {
    /// Alert for a status transition, if the transition is worth one.
    /// `incident` is the incident the transition opened or touched.
    pub fn from_transition(transition: &StatusTransition, incident: Option<&Incident>) -> Option<Self> {
        let event_type = transition_event_type(transition)?;
        Some(Self {
            event_type,
            severity: transition_severity(transition),
            resource: transition.resource.clone(),
            previous_status: Some(transition.previous),
            status: Some(transition.current),
            incident: incident.cloned(),
            detail: transition.detail.clone(),
            at: transition.at,
            source_id: Some(transition.id),
        })
    }

    /// Alert for an incident change, if the change is worth one
    pub fn from_incident(event: &IncidentEvent, at: DateTime<Utc>) -> Option<Self> {
        let event_type = event.kind.notification_event()?;
        let incident = &event.incident;
        Some(Self {
            event_type,
            severity: incident.severity,
            resource: incident.resource.clone(),
            previous_status: None,
            status: None,
            incident: Some(incident.clone()),
            detail: incident.timeline.last().map(|entry| entry.message.clone()),
            at,
            source_id: event.transition_id,
        })
    }
}

/// Scope filters. An empty filter matches everything.
fn in_scope(rule: &NotificationRule, resource: &ResourceRef) -> bool {
    let customer = rule.customer_ids.is_empty()
        || resource.customer_id.is_some_and(|customer| rule.customer_ids.contains(&customer));
    let host = rule.host_ids.is_empty() || resource.host_id.is_some_and(|host| rule.host_ids.contains(&host));
    let check = rule.check_ids.is_empty()
        || (resource.kind == ResourceKind::Check && rule.check_ids.contains(&resource.id));
    let tags = rule.tags.is_empty() || rule.tags.iter().any(|tag| resource.tags.contains(tag));

    customer && host && check && tags
}

pub fn matches(rule: &NotificationRule, event: &AlertEvent) -> bool {
    rule.enabled
        && rule.event_types.contains(&event.event_type)
        && rule.min_severity.is_none_or(|min| event.severity >= min)
        && in_scope(rule, &event.resource)
}

/// Rules matching `event`, highest priority first
pub fn matching_rules(rules: Vec<NotificationRule>, event: &AlertEvent) -> Vec<NotificationRule> {
    let mut matched: Vec<NotificationRule> = rules.into_iter().filter(|rule| matches(rule, event)).collect();
    matched.sort_by(|a, b| b.priority.cmp(&a.priority));
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MonitoredResource, TransitionCause};
    use crate::monitoring::types::{CheckSpec, CheckType};

    fn down_event(resource: &MonitoredResource) -> AlertEvent {
        let mut resource = resource.clone();
        resource.status = Status::Up;
        let transition = resource.transition_to(Status::Down, TransitionCause::ProbeFailure, None, Utc::now()).unwrap();
        AlertEvent::from_transition(&transition, None).unwrap()
    }

    #[test]
    fn test_event_type_and_severity_filters() {
        let host = MonitoredResource::host("web-01", "hash").with_severity(Severity::Medium);
        let event = down_event(&host);

        let mut rule = NotificationRule::new("ops", vec![NotificationEventType::HostDown], Uuid::new_v4());
        assert!(matches(&rule, &event));

        rule.min_severity = Some(Severity::High);
        assert!(!matches(&rule, &event));

        rule.min_severity = Some(Severity::Medium);
        rule.event_types = vec![NotificationEventType::HostUp];
        assert!(!matches(&rule, &event));
    }

    #[test]
    fn test_scope_filters() {
        let customer = Uuid::new_v4();
        let check = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 60)
            .with_customer(customer)
            .with_tags(vec!["prod".into()]);
        let event = down_event(&check);

        let mut rule = NotificationRule::new("ops", vec![NotificationEventType::CheckFailed], Uuid::new_v4());
        rule.customer_ids = vec![customer];
        rule.tags = vec!["prod".into(), "eu".into()];
        rule.check_ids = vec![check.id];
        assert!(matches(&rule, &event));

        rule.host_ids = vec![Uuid::new_v4()];
        assert!(!matches(&rule, &event));

        rule.host_ids.clear();
        rule.customer_ids = vec![Uuid::new_v4()];
        assert!(!matches(&rule, &event));
    }

    #[test]
    fn test_priority_order_and_disabled_rules() {
        let host = MonitoredResource::host("web-01", "hash");
        let event = down_event(&host);
        let channel = Uuid::new_v4();

        let mut low = NotificationRule::new("low", vec![NotificationEventType::HostDown], channel);
        low.priority = 1;
        let mut high = NotificationRule::new("high", vec![NotificationEventType::HostDown], channel);
        high.priority = 10;
        let mut off = NotificationRule::new("off", vec![NotificationEventType::HostDown], channel);
        off.enabled = false;

        let matched = matching_rules(vec![low, off, high], &event);
        let names: Vec<&str> = matched.iter().map(|rule| rule.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }
}
