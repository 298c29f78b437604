use super::rules::AlertEvent;
use crate::models::{MessageTemplate, NotificationEventType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Default subject per event type
fn default_subject(event_type: NotificationEventType) -> &'static str {
    use NotificationEventType as E;

    match event_type {
        E::HostDown => "[{{severity}}] Host DOWN: {{resource_name}}",
        E::HostUp => "Host UP: {{resource_name}}",
        E::HostWarning => "[{{severity}}] Host warning: {{resource_name}}",
        E::HostMaintenanceStarted => "Maintenance started: {{resource_name}}",
        E::HostMaintenanceEnded => "Maintenance ended: {{resource_name}}",
        E::ServiceDown => "[{{severity}}] Service DOWN: {{resource_name}}",
        E::ServiceUp => "Service UP: {{resource_name}}",
        E::ServiceWarning => "[{{severity}}] Service warning: {{resource_name}}",
        E::CheckFailed => "[{{severity}}] Check FAILED: {{resource_name}}",
        E::CheckRecovered => "Check RECOVERED: {{resource_name}}",
        E::CheckSlowResponse => "[{{severity}}] Slow response: {{resource_name}}",
        E::IncidentCreated => "[{{severity}}] Incident #{{incident_number}}: {{incident_title}}",
        E::IncidentAcknowledged => "Incident #{{incident_number}} acknowledged",
        E::IncidentAssigned => "Incident #{{incident_number}} assigned",
        E::IncidentEscalated => "[{{severity}}] Incident #{{incident_number}} ESCALATED: {{incident_title}}",
        E::IncidentResolved => "Incident #{{incident_number}} resolved: {{incident_title}}",
        E::IncidentClosed => "Incident #{{incident_number}} closed",
        E::IncidentReopened => "[{{severity}}] Incident #{{incident_number}} reopened: {{incident_title}}",
        E::SlaResponseBreached => "[{{severity}}] Response SLA breached: incident #{{incident_number}}",
        E::SlaResolutionBreached => "[{{severity}}] Resolution SLA breached: incident #{{incident_number}}",
    }
}

const DEFAULT_BODY: &str = "Event: {{event_type}}\n\
Resource: {{resource_name}} ({{resource_kind}})\n\
Status: {{status}}\n\
Severity: {{severity}}\n\
Time: {{timestamp}}\n\
{{detail}}";

const INCIDENT_BODY: &str = "Event: {{event_type}}\n\
Incident: #{{incident_number}} {{incident_title}}\n\
Incident status: {{incident_status}}\n\
Resource: {{resource_name}} ({{resource_kind}})\n\
Severity: {{severity}}\n\
Time: {{timestamp}}\n\
{{detail}}";

fn placeholders(event: &AlertEvent) -> Vec<(&'static str, String)> {
    let optional = |value: Option<String>| value.unwrap_or_default();

    vec![
        ("event_type", event.event_type.to_string()),
        ("severity", event.severity.to_string().to_uppercase()),
        ("resource_name", event.resource.name.clone()),
        ("resource_kind", event.resource.kind.to_string()),
        ("resource_id", event.resource.id.to_string()),
        ("status", optional(event.status.map(|status| status.to_string()))),
        ("previous_status", optional(event.previous_status.map(|status| status.to_string()))),
        ("detail", optional(event.detail.clone())),
        ("timestamp", event.at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ("incident_number", optional(event.incident.as_ref().map(|incident| incident.number.to_string()))),
        ("incident_title", optional(event.incident.as_ref().map(|incident| incident.title.clone()))),
        ("incident_status", optional(event.incident.as_ref().map(|incident| incident.status.to_string()))),
    ]
}

/// Replace every `{{name}}` with its value. Unknown placeholders are left as is.
fn substitute(text: &str, values: &[(&'static str, String)]) -> String {
    values.iter().fold(text.to_string(), |acc, (name, value)| acc.replace(&format!("{{{{{}}}}}", name), value))
}

/// Render with the rule's template, or the default for the event type
pub fn render(template: Option<&MessageTemplate>, event: &AlertEvent) -> RenderedMessage {
    let values = placeholders(event);
    let (subject, body) = match template {
        Some(template) => (template.subject.as_str(), template.body.as_str()),
        None if event.incident.is_some() && event.status.is_none() => {
            (default_subject(event.event_type), INCIDENT_BODY)
        }
        None => (default_subject(event.event_type), DEFAULT_BODY),
    };

    RenderedMessage {
        subject: substitute(subject, &values),
        body: substitute(body, &values).trim_end().to_string(),
    }
}
