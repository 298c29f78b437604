//! Events flowing out of the status tracker and the incident manager.
//!
//! Every side effect downstream (incidents, notifications, live updates) is
//! driven by one of these; nothing reacts to raw probe results directly
//! except the live `CheckResult` stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Incident, NotificationEventType, ResourceKind, ResourceRef, Severity, SlaBreach, Status, StatusTransition,
};
use crate::monitoring::types::ProbeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentEventKind {
    Created,
    Occurrence,
    StatusUpdate,
    Acknowledged,
    Assigned,
    Escalated,
    Resolved,
    AutoResolved,
    RecoveredAwaitingOperator,
    Closed,
    Reopened,
    Commented,
    SlaBreached(SlaBreach),
}

impl IncidentEventKind {
    /// Notification taxonomy entry, if this change is worth notifying about
    pub fn notification_event(self) -> Option<NotificationEventType> {
        match self {
            IncidentEventKind::Created => Some(NotificationEventType::IncidentCreated),
            IncidentEventKind::Acknowledged => Some(NotificationEventType::IncidentAcknowledged),
            IncidentEventKind::Assigned => Some(NotificationEventType::IncidentAssigned),
            IncidentEventKind::Escalated => Some(NotificationEventType::IncidentEscalated),
            IncidentEventKind::Resolved | IncidentEventKind::AutoResolved => {
                Some(NotificationEventType::IncidentResolved)
            }
            IncidentEventKind::Closed => Some(NotificationEventType::IncidentClosed),
            IncidentEventKind::Reopened => Some(NotificationEventType::IncidentReopened),
            IncidentEventKind::SlaBreached(SlaBreach::Response) => Some(NotificationEventType::SlaResponseBreached),
            IncidentEventKind::SlaBreached(SlaBreach::Resolution) => {
                Some(NotificationEventType::SlaResolutionBreached)
            }
            IncidentEventKind::Occurrence
            | IncidentEventKind::StatusUpdate
            | IncidentEventKind::RecoveredAwaitingOperator
            | IncidentEventKind::Commented => None,
        }
    }
}

/// A change to an incident, with a snapshot taken after the change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub kind: IncidentEventKind,
    pub incident: Incident,
    pub actor: Option<String>,
    /// Status transition that caused the change
    #[serde(default)]
    pub transition_id: Option<Uuid>,
}

impl IncidentEvent {
    pub fn new(kind: IncidentEventKind, incident: Incident, actor: Option<String>) -> Self {
        Self { kind, incident, actor, transition_id: None }
    }

    pub fn caused_by(mut self, transition_id: Uuid) -> Self {
        self.transition_id = Some(transition_id);
        self
    }
}

/// What the engine reports to embedders subscribed through the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StatusChanged(StatusTransition),
    Incident(IncidentEvent),
    ProbeCompleted { resource: ResourceRef, result: ProbeResult },
}

/// Notification taxonomy entry for a status transition.
///
/// Recoveries only count when leaving a bad class, so `Unknown -> Up` on a
/// fresh resource stays silent.
pub fn transition_event_type(transition: &StatusTransition) -> Option<NotificationEventType> {
    use NotificationEventType as E;

    let recovered = transition.is_recovery();
    match (transition.resource.kind, transition.previous, transition.current) {
        (ResourceKind::Host, _, Status::Down) => Some(E::HostDown),
        (ResourceKind::Host, _, Status::Warning | Status::Degraded) => Some(E::HostWarning),
        (ResourceKind::Host, _, Status::Maintenance) => Some(E::HostMaintenanceStarted),
        (ResourceKind::Host, Status::Maintenance, Status::Up) => Some(E::HostMaintenanceEnded),
        (ResourceKind::Host, _, Status::Up) if recovered => Some(E::HostUp),

        (ResourceKind::Check, _, Status::Down) => Some(E::CheckFailed),
        (ResourceKind::Check, _, Status::Degraded | Status::Warning) => Some(E::CheckSlowResponse),
        (ResourceKind::Check, _, Status::Up) if recovered => Some(E::CheckRecovered),

        (ResourceKind::Service, _, Status::Down) => Some(E::ServiceDown),
        (ResourceKind::Service, _, Status::Warning | Status::Degraded) => Some(E::ServiceWarning),
        (ResourceKind::Service, _, Status::Up) if recovered => Some(E::ServiceUp),

        _ => None,
    }
}

/// Severity used for rule matching on a transition
pub fn transition_severity(transition: &StatusTransition) -> Severity {
    match transition.current {
        Status::Down => transition.resource.severity,
        Status::Degraded | Status::Warning => transition.resource.severity.lower(),
        _ => Severity::Info,
    }
}
