use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::events::{IncidentEvent, IncidentEventKind};
use crate::models::{HostMetrics, IncidentStatus, ResourceKind, ResourceRef, Severity, Status, StatusTransition};
use crate::monitoring::types::{ProbeErrorKind, ProbeResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostUpdate {
    pub host_id: Uuid,
    pub name: String,
    pub status: Status,
    pub previous_status: Status,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
    pub metrics: Option<HostMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUpdate {
    pub service_id: Uuid,
    pub host_id: Option<Uuid>,
    pub name: String,
    pub status: Status,
    pub previous_status: Status,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResultUpdate {
    pub check_id: Uuid,
    pub name: String,
    pub success: bool,
    pub degraded: bool,
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error_kind: Option<ProbeErrorKind>,
    pub error_message: Option<String>,
    /// Status after the result was applied, when it changed
    pub status: Option<Status>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentUpdate {
    pub incident_id: Uuid,
    pub number: u64,
    pub resource_id: Uuid,
    pub resource_name: String,
    pub title: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub occurrence_count: u32,
    pub escalation_level: u32,
    pub change: IncidentEventKind,
    pub actor: Option<String>,
}

/// Named events pushed to live subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum RealtimeEvent {
    HostUpdate(HostUpdate),
    ServiceUpdate(ServiceUpdate),
    CheckResult(CheckResultUpdate),
    IncidentCreated(IncidentUpdate),
    IncidentUpdated(IncidentUpdate),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::HostUpdate(_) => "HostUpdate",
            RealtimeEvent::ServiceUpdate(_) => "ServiceUpdate",
            RealtimeEvent::CheckResult(_) => "CheckResult",
            RealtimeEvent::IncidentCreated(_) => "IncidentCreated",
            RealtimeEvent::IncidentUpdated(_) => "IncidentUpdated",
        }
    }

    /// Host and service transitions. Check status travels with `CheckResult`.
    pub fn from_transition(transition: &StatusTransition, metrics: Option<HostMetrics>) -> Option<Self> {
        let resource = &transition.resource;
        match resource.kind {
            ResourceKind::Host => Some(RealtimeEvent::HostUpdate(HostUpdate {
                host_id: resource.id,
                name: resource.name.clone(),
                status: transition.current,
                previous_status: transition.previous,
                at: transition.at,
                detail: transition.detail.clone(),
                metrics,
            })),
            ResourceKind::Service => Some(RealtimeEvent::ServiceUpdate(ServiceUpdate {
                service_id: resource.id,
                host_id: resource.host_id,
                name: resource.name.clone(),
                status: transition.current,
                previous_status: transition.previous,
                at: transition.at,
            })),
            ResourceKind::Check => None,
        }
    }

    pub fn check_result(resource: &ResourceRef, result: &ProbeResult, status: Option<Status>) -> Self {
        RealtimeEvent::CheckResult(CheckResultUpdate {
            check_id: resource.id,
            name: resource.name.clone(),
            success: result.success,
            degraded: result.degraded,
            latency_ms: result.latency_ms,
            status_code: result.status_code,
            error_kind: result.error_kind,
            error_message: result.error_message.clone(),
            status,
            at: result.timestamp,
        })
    }

    pub fn from_incident(event: &IncidentEvent) -> Self {
        let incident = &event.incident;
        let update = IncidentUpdate {
            incident_id: incident.id,
            number: incident.number,
            resource_id: incident.resource.id,
            resource_name: incident.resource.name.clone(),
            title: incident.title.clone(),
            status: incident.status,
            severity: incident.severity,
            occurrence_count: incident.occurrence_count,
            escalation_level: incident.escalation_level,
            change: event.kind,
            actor: event.actor.clone(),
        };

        match event.kind {
            IncidentEventKind::Created => RealtimeEvent::IncidentCreated(update),
            _ => RealtimeEvent::IncidentUpdated(update),
        }
    }
}
