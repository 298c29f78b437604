use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::resource::{ResourceRef, Severity, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    New,
    Acknowledged,
    InProgress,
    Resolved,
    Closed,
}

impl IncidentStatus {
    pub fn is_open(self) -> bool {
        !matches!(self, IncidentStatus::Resolved | IncidentStatus::Closed)
    }

    /// Acknowledged or being worked on by an operator
    pub fn is_owned(self) -> bool {
        matches!(self, IncidentStatus::Acknowledged | IncidentStatus::InProgress)
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentStatus::New => write!(f, "new"),
            IncidentStatus::Acknowledged => write!(f, "acknowledged"),
            IncidentStatus::InProgress => write!(f, "in_progress"),
            IncidentStatus::Resolved => write!(f, "resolved"),
            IncidentStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Dedup key component: at most one open incident per resource and cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentCause {
    Unavailable,
    Degraded,
}

impl IncidentCause {
    pub fn from_status(status: Status) -> Option<Self> {
        match status {
            Status::Down => Some(IncidentCause::Unavailable),
            Status::Degraded => Some(IncidentCause::Degraded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
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
    Comment,
    SlaResponseBreached,
    SlaResolutionBreached,
}

/// Append-only timeline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub kind: TimelineKind,
    pub actor: Option<String>,
    pub message: String,
}

/// Which SLA clock was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaBreach {
    Response,
    Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub number: u64,
    pub resource: ResourceRef,
    pub cause: IncidentCause,
    pub auto_created: bool,

    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub status: IncidentStatus,

    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub assigned_to: Option<String>,
    pub resolved_by: Option<String>,
    pub escalation_level: u32,

    pub response_due: DateTime<Utc>,
    pub resolution_due: DateTime<Utc>,
    pub sla_response_breached: bool,
    pub sla_resolution_breached: bool,
    pub response_sla_met: Option<bool>,
    pub resolution_sla_met: Option<bool>,

    pub occurrence_count: u32,
    pub last_occurrence_at: DateTime<Utc>,
    pub timeline: Vec<TimelineEntry>,
    /// Status transitions already applied, most recent last
    #[serde(default)]
    pub transition_ids: Vec<Uuid>,
}

/// How many applied transition ids an incident remembers
const TRANSITION_MEMORY: usize = 32;

impl Incident {
    /// Start SLA clocks and record the creation entry
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        number: u64,
        resource: ResourceRef,
        cause: IncidentCause,
        severity: Severity,
        title: String,
        description: Option<String>,
        response_sla: Duration,
        resolution_sla: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut incident = Self {
            id: Uuid::new_v4(),
            number,
            resource,
            cause,
            auto_created: true,
            title,
            description,
            severity,
            status: IncidentStatus::New,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
            closed_at: None,
            acknowledged_by: None,
            assigned_to: None,
            resolved_by: None,
            escalation_level: 0,
            response_due: now + response_sla,
            resolution_due: now + resolution_sla,
            sla_response_breached: false,
            sla_resolution_breached: false,
            response_sla_met: None,
            resolution_sla_met: None,
            occurrence_count: 1,
            last_occurrence_at: now,
            timeline: Vec::new(),
            transition_ids: Vec::new(),
        };
        let message = format!("Incident automatically created for {}", incident.resource.name);
        incident.record(TimelineKind::Created, None, message, now);
        incident
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn record(&mut self, kind: TimelineKind, actor: Option<&str>, message: impl Into<String>, at: DateTime<Utc>) {
        self.timeline.push(TimelineEntry { at, kind, actor: actor.map(str::to_string), message: message.into() });
    }

    pub fn has_applied(&self, transition_id: Uuid) -> bool {
        self.transition_ids.contains(&transition_id)
    }

    pub fn note_transition(&mut self, transition_id: Uuid) {
        if self.has_applied(transition_id) {
            return;
        }
        self.transition_ids.push(transition_id);
        if self.transition_ids.len() > TRANSITION_MEMORY {
            let excess = self.transition_ids.len() - TRANSITION_MEMORY;
            self.transition_ids.drain(..excess);
        }
    }

    /// Whether `breach` passed its deadline and has not been flagged yet
    pub fn sla_breach_due(&self, breach: SlaBreach, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        match breach {
            SlaBreach::Response => {
                !self.sla_response_breached && self.acknowledged_at.is_none() && now > self.response_due
            }
            SlaBreach::Resolution => {
                !self.sla_resolution_breached && self.resolved_at.is_none() && now > self.resolution_due
            }
        }
    }

    pub fn flag_sla_breach(&mut self, breach: SlaBreach) {
        match breach {
            SlaBreach::Response => self.sla_response_breached = true,
            SlaBreach::Resolution => self.sla_resolution_breached = true,
        }
    }

    /// Breaches due at `now`, without flagging them
    pub fn due_sla_breaches(&self, now: DateTime<Utc>) -> Vec<SlaBreach> {
        [SlaBreach::Response, SlaBreach::Resolution]
            .into_iter()
            .filter(|breach| self.sla_breach_due(*breach, now))
            .collect()
    }

    /// Flag deadlines that passed without the matching state change.
    ///
    /// Returns only breaches that were not flagged before, so callers can emit
    /// each breach event once.
    pub fn evaluate_sla(&mut self, now: DateTime<Utc>) -> Vec<SlaBreach> {
        let breaches = self.due_sla_breaches(now);
        for breach in &breaches {
            self.flag_sla_breach(*breach);
        }
        breaches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resource::MonitoredResource;

    fn incident_at(now: DateTime<Utc>) -> Incident {
        let host = MonitoredResource::host("db-01", "hash");
        Incident::open(
            1,
            ResourceRef::from(&host),
            IncidentCause::Unavailable,
            Severity::Critical,
            "Host DOWN: db-01".into(),
            None,
            Duration::minutes(15),
            Duration::minutes(240),
            now,
        )
    }

    #[test]
    fn test_open_starts_clocks() {
        let now = Utc::now();
        let incident = incident_at(now);

        assert_eq!(incident.response_due, now + Duration::minutes(15));
        assert_eq!(incident.resolution_due, now + Duration::minutes(240));
        assert_eq!(incident.timeline.len(), 1);
        assert_eq!(incident.timeline[0].kind, TimelineKind::Created);
        assert_eq!(incident.occurrence_count, 1);
    }

    #[test]
    fn test_sla_breach_flagged_once() {
        let now = Utc::now();
        let mut incident = incident_at(now);

        assert!(incident.evaluate_sla(now + Duration::minutes(15)).is_empty());
        assert_eq!(incident.evaluate_sla(now + Duration::minutes(16)), vec![SlaBreach::Response]);
        assert!(incident.evaluate_sla(now + Duration::minutes(17)).is_empty());
        assert_eq!(incident.evaluate_sla(now + Duration::minutes(241)), vec![SlaBreach::Resolution]);
    }

    #[test]
    fn test_acknowledged_incident_does_not_breach_response() {
        let now = Utc::now();
        let mut incident = incident_at(now);
        incident.acknowledged_at = Some(now + Duration::minutes(5));
        incident.status = IncidentStatus::Acknowledged;

        assert!(incident.evaluate_sla(now + Duration::minutes(30)).is_empty());
    }

    #[test]
    fn test_due_breaches_are_not_flagged_until_asked() {
        let now = Utc::now();
        let mut incident = incident_at(now);
        let late = now + Duration::minutes(241);

        assert_eq!(incident.due_sla_breaches(late), vec![SlaBreach::Response, SlaBreach::Resolution]);
        assert!(!incident.sla_response_breached);

        incident.flag_sla_breach(SlaBreach::Response);
        assert_eq!(incident.due_sla_breaches(late), vec![SlaBreach::Resolution]);
    }

    #[test]
    fn test_transition_memory_is_bounded() {
        let mut incident = incident_at(Utc::now());
        let first = Uuid::new_v4();
        incident.note_transition(first);
        incident.note_transition(first);
        assert_eq!(incident.transition_ids.len(), 1);

        for _ in 0..TRANSITION_MEMORY {
            incident.note_transition(Uuid::new_v4());
        }
        assert_eq!(incident.transition_ids.len(), TRANSITION_MEMORY);
        assert!(!incident.has_applied(first));
    }
}
