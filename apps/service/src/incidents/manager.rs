use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lifecycle::{AutoResolvePolicy, IncidentAction};
use crate::database::Repository;
use crate::error::IncidentError;
use crate::events::{IncidentEvent, IncidentEventKind};
use crate::locks::KeyedMutex;
use crate::models::{
    Incident, IncidentCause, IncidentStatus, ResourceKind, SlaBreach, Status, StatusTransition, TimelineKind,
};

#[derive(Debug, Clone)]
pub struct IncidentConfig {
    pub response_sla: Duration,
    pub resolution_sla: Duration,
    pub auto_resolve: AutoResolvePolicy,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            response_sla: Duration::minutes(15),
            resolution_sla: Duration::minutes(240),
            auto_resolve: AutoResolvePolicy::default(),
        }
    }
}

/// An operator action on one incident
#[derive(Debug, Clone)]
pub struct OperatorRequest {
    pub action: IncidentAction,
    pub actor: String,
    pub comment: Option<String>,
    /// Only used by `Assign`; defaults to the actor
    pub assignee: Option<String>,
}

impl OperatorRequest {
    pub fn new(action: IncidentAction, actor: impl Into<String>) -> Self {
        Self { action, actor: actor.into(), comment: None, assignee: None }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }
}

fn title_for(transition: &StatusTransition) -> String {
    let kind = match transition.resource.kind {
        ResourceKind::Host => "Host",
        ResourceKind::Check => "Check",
        ResourceKind::Service => "Service",
    };
    format!("{} {}: {}", kind, transition.current.to_string().to_uppercase(), transition.resource.name)
}

fn sla_kind(breach: SlaBreach) -> TimelineKind {
    match breach {
        SlaBreach::Response => TimelineKind::SlaResponseBreached,
        SlaBreach::Resolution => TimelineKind::SlaResolutionBreached,
    }
}

/// Creates, deduplicates and resolves incidents from status transitions and
/// applies operator actions.
///
/// Work on incidents of the same resource is serialized.
pub struct IncidentManager {
    repository: Arc<dyn Repository>,
    locks: KeyedMutex<Uuid>,
    config: IncidentConfig,
}

impl IncidentManager {
    pub fn new(repository: Arc<dyn Repository>, config: IncidentConfig) -> Self {
        Self { repository, locks: KeyedMutex::new(), config }
    }

    /// React to a status transition.
    ///
    /// A transition that was already applied changes nothing; the events it
    /// produced are rebuilt from the incidents it touched.
    pub async fn handle_transition(&self, transition: &StatusTransition) -> Result<Vec<IncidentEvent>> {
        let _guard = self.locks.lock(&transition.resource.id).await;

        let applied: Vec<Incident> = self
            .repository
            .incidents_for(transition.resource.id)
            .await?
            .into_iter()
            .filter(|incident| incident.has_applied(transition.id))
            .collect();
        if !applied.is_empty() {
            debug!("Transition {} for {} already applied", transition.id, transition.resource.name);
            return Ok(applied.into_iter().map(|incident| replayed_event(transition, incident)).collect());
        }

        let events = if let Some(cause) = IncidentCause::from_status(transition.current) {
            vec![self.on_failure(transition, cause).await?]
        } else {
            match transition.current {
                Status::Up | Status::Warning => self.on_recovery(transition).await?,
                Status::Maintenance | Status::Unknown | Status::Down | Status::Degraded => Vec::new(),
            }
        };
        Ok(events.into_iter().map(|event| event.caused_by(transition.id)).collect())
    }

    async fn on_failure(&self, transition: &StatusTransition, cause: IncidentCause) -> Result<IncidentEvent> {
        let resource = &transition.resource;
        let open = self.repository.open_incidents_for(resource.id).await?;
        let severity = match cause {
            IncidentCause::Unavailable => resource.severity,
            IncidentCause::Degraded => resource.severity.lower(),
        };
        let change = format!("Status changed {} -> {}", transition.previous, transition.current);
        let message = match &transition.detail {
            Some(detail) => format!("{}: {}", change, detail),
            None => change,
        };

        if let Some(mut incident) = open.iter().find(|incident| incident.cause == cause).cloned() {
            incident.occurrence_count += 1;
            incident.last_occurrence_at = transition.at;
            incident.record(TimelineKind::Occurrence, None, message, transition.at);
            incident.note_transition(transition.id);
            self.repository.save_incident(&incident).await?;

            info!("Incident #{} for {} occurred again ({} times)", incident.number, resource.name, incident.occurrence_count);
            return Ok(IncidentEvent::new(IncidentEventKind::Occurrence, incident, None));
        }

        if let Some(mut incident) = open.into_iter().next() {
            incident.severity = incident.severity.max(severity);
            incident.last_occurrence_at = transition.at;
            incident.record(TimelineKind::StatusUpdate, None, message, transition.at);
            incident.note_transition(transition.id);
            self.repository.save_incident(&incident).await?;

            return Ok(IncidentEvent::new(IncidentEventKind::StatusUpdate, incident, None));
        }

        let number = self.repository.next_incident_number().await?;
        let mut incident = Incident::open(
            number,
            resource.clone(),
            cause,
            severity,
            title_for(transition),
            transition.detail.clone(),
            self.config.response_sla,
            self.config.resolution_sla,
            transition.at,
        );
        incident.record(TimelineKind::StatusUpdate, None, message, transition.at);
        incident.note_transition(transition.id);
        self.repository.save_incident(&incident).await?;

        info!(
            resource_id = %resource.id,
            severity = %severity,
            "Opened incident #{}: {}",
            incident.number,
            incident.title
        );
        Ok(IncidentEvent::new(IncidentEventKind::Created, incident, None))
    }

    async fn on_recovery(&self, transition: &StatusTransition) -> Result<Vec<IncidentEvent>> {
        let mut events = Vec::new();

        for mut incident in self.repository.open_incidents_for(transition.resource.id).await? {
            if !incident.auto_created {
                continue;
            }

            let kind = if self.config.auto_resolve.allows(incident.status) {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(transition.at);
                incident.resolution_sla_met = Some(transition.at <= incident.resolution_due);
                let message = format!("{} recovered ({})", transition.resource.name, transition.current);
                incident.record(TimelineKind::AutoResolved, None, message, transition.at);
                info!("Auto-resolved incident #{} for {}", incident.number, transition.resource.name);
                IncidentEventKind::AutoResolved
            } else {
                let message =
                    format!("{} recovered ({}), awaiting operator resolution", transition.resource.name, transition.current);
                incident.record(TimelineKind::RecoveredAwaitingOperator, None, message, transition.at);
                IncidentEventKind::RecoveredAwaitingOperator
            };

            incident.note_transition(transition.id);
            self.repository.save_incident(&incident).await?;
            events.push(IncidentEvent::new(kind, incident, None));
        }

        Ok(events)
    }

    /// Apply an operator action. Illegal transitions are rejected untouched.
    pub async fn apply(
        &self,
        id: Uuid,
        request: OperatorRequest,
        now: DateTime<Utc>,
    ) -> Result<IncidentEvent, IncidentError> {
        let actor = request.actor.trim();
        if actor.is_empty() {
            return Err(IncidentError::Invalid("actor is required".into()));
        }

        let resource_id = self.load(id).await?.resource.id;
        let _guard = self.locks.lock(&resource_id).await;
        let mut incident = self.load(id).await?;

        let action = request.action;
        let next = action
            .next_status(incident.status)
            .ok_or(IncidentError::IllegalTransition { action, status: incident.status })?;

        let mut message = match action {
            IncidentAction::Acknowledge => {
                incident.acknowledged_at = Some(now);
                incident.acknowledged_by = Some(actor.to_string());
                incident.response_sla_met = Some(now <= incident.response_due);
                format!("Acknowledged by {}", actor)
            }
            IncidentAction::Assign => {
                let assignee = request.assignee.as_deref().map(str::trim).filter(|a| !a.is_empty()).unwrap_or(actor);
                incident.assigned_to = Some(assignee.to_string());
                format!("Assigned to {}", assignee)
            }
            IncidentAction::Escalate => {
                incident.escalation_level += 1;
                format!("Escalated to level {}", incident.escalation_level)
            }
            IncidentAction::Resolve => {
                incident.resolved_at = Some(now);
                incident.resolved_by = Some(actor.to_string());
                incident.resolution_sla_met = Some(now <= incident.resolution_due);
                format!("Resolved by {}", actor)
            }
            IncidentAction::Close => {
                incident.closed_at = Some(now);
                format!("Closed by {}", actor)
            }
            IncidentAction::Reopen => {
                let open = self.repository.open_incidents_for(incident.resource.id).await?;
                if let Some(other) = open.iter().find(|other| other.cause == incident.cause) {
                    return Err(IncidentError::Invalid(format!(
                        "incident #{} is already open for this resource",
                        other.number
                    )));
                }
                self.restart_clocks(&mut incident, now);
                format!("Reopened by {}", actor)
            }
            IncidentAction::Comment => match request.comment.as_deref().map(str::trim) {
                Some(comment) if !comment.is_empty() => comment.to_string(),
                _ => return Err(IncidentError::Invalid("comment text is required".into())),
            },
        };

        if action != IncidentAction::Comment {
            if let Some(comment) = request.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                message = format!("{}: {}", message, comment);
            }
        }

        incident.status = next;
        incident.record(action.timeline_kind(), Some(actor), message, now);
        self.repository.save_incident(&incident).await?;

        info!("Incident #{} {} by {} (now {})", incident.number, action, actor, incident.status);
        Ok(IncidentEvent::new(action.event_kind(), incident, Some(actor.to_string())))
    }

    fn restart_clocks(&self, incident: &mut Incident, now: DateTime<Utc>) {
        incident.acknowledged_at = None;
        incident.acknowledged_by = None;
        incident.assigned_to = None;
        incident.resolved_at = None;
        incident.resolved_by = None;
        incident.closed_at = None;
        incident.response_due = now + self.config.response_sla;
        incident.resolution_due = now + self.config.resolution_sla;
        incident.sla_response_breached = false;
        incident.sla_resolution_breached = false;
        incident.response_sla_met = None;
        incident.resolution_sla_met = None;
        incident.last_occurrence_at = now;
    }

    /// Escalate an incident nobody has picked up. Returns `None` when the
    /// incident was resolved or taken in the meantime.
    pub async fn escalate_unowned(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Option<IncidentEvent>> {
        let Some(incident) = self.repository.get_incident(id).await? else {
            return Ok(None);
        };
        let _guard = self.locks.lock(&incident.resource.id).await;

        let Some(mut incident) = self.repository.get_incident(id).await? else {
            return Ok(None);
        };
        if !incident.is_open() || incident.status.is_owned() {
            return Ok(None);
        }

        incident.escalation_level += 1;
        incident.record(TimelineKind::Escalated, None, reason, now);
        self.repository.save_incident(&incident).await?;

        warn!("Escalated incident #{} to level {}", incident.number, incident.escalation_level);
        Ok(Some(IncidentEvent::new(IncidentEventKind::Escalated, incident, None)))
    }

    async fn load(&self, id: Uuid) -> Result<Incident, IncidentError> {
        self.repository.get_incident(id).await?.ok_or(IncidentError::NotFound(id))
    }

    /// Read an incident with SLA flags evaluated as of `now`. The view is not persisted.
    pub async fn get(&self, id: Uuid, now: DateTime<Utc>) -> Result<Incident, IncidentError> {
        let mut incident = self.load(id).await?;
        incident.evaluate_sla(now);
        Ok(incident)
    }

    pub async fn list_open(&self, now: DateTime<Utc>) -> Result<Vec<Incident>> {
        let mut incidents = self.repository.open_incidents().await?;
        for incident in &mut incidents {
            incident.evaluate_sla(now);
        }
        incidents.sort_by_key(|incident| incident.number);
        Ok(incidents)
    }

    /// SLA breaches due at `now` that were not flagged yet.
    ///
    /// Nothing is persisted here. Each event carries a snapshot with the
    /// breach applied; [`Self::commit_sla_breach`] records it once the breach
    /// was routed, so a failed notification is retried on the next sweep.
    pub async fn pending_sla_breaches(&self, now: DateTime<Utc>) -> Result<Vec<IncidentEvent>> {
        let mut events = Vec::new();

        for incident in self.repository.open_incidents().await? {
            for breach in incident.due_sla_breaches(now) {
                let mut snapshot = incident.clone();
                snapshot.flag_sla_breach(breach);
                snapshot.record(sla_kind(breach), None, breach_message(&snapshot, breach), now);
                events.push(IncidentEvent::new(IncidentEventKind::SlaBreached(breach), snapshot, None));
            }
        }

        Ok(events)
    }

    /// Flag a breach reported by [`Self::pending_sla_breaches`]. Returns
    /// false when it was flagged meanwhile or the incident moved on.
    pub async fn commit_sla_breach(&self, event: &IncidentEvent, now: DateTime<Utc>) -> Result<bool> {
        let IncidentEventKind::SlaBreached(breach) = event.kind else {
            return Ok(false);
        };
        let _guard = self.locks.lock(&event.incident.resource.id).await;

        let Some(mut incident) = self.repository.get_incident(event.incident.id).await? else {
            return Ok(false);
        };
        if !incident.sla_breach_due(breach, now) {
            return Ok(false);
        }

        incident.flag_sla_breach(breach);
        incident.record(sla_kind(breach), None, breach_message(&incident, breach), now);
        self.repository.save_incident(&incident).await?;

        warn!("Incident #{} breached its {:?} SLA", incident.number, breach);
        Ok(true)
    }
}

fn breach_message(incident: &Incident, breach: SlaBreach) -> String {
    match breach {
        SlaBreach::Response => format!("Response SLA breached (due {})", incident.response_due),
        SlaBreach::Resolution => format!("Resolution SLA breached (due {})", incident.resolution_due),
    }
}

/// Event a transition produced the first time it was applied to `incident`
fn replayed_event(transition: &StatusTransition, incident: Incident) -> IncidentEvent {
    let kind = match IncidentCause::from_status(transition.current) {
        Some(_) if incident.transition_ids.first() == Some(&transition.id) => IncidentEventKind::Created,
        Some(cause) if cause == incident.cause => IncidentEventKind::Occurrence,
        Some(_) => IncidentEventKind::StatusUpdate,
        None if incident.resolved_by.is_none() && incident.resolved_at == Some(transition.at) => {
            IncidentEventKind::AutoResolved
        }
        None => IncidentEventKind::RecoveredAwaitingOperator,
    };
    IncidentEvent::new(kind, incident, None).caused_by(transition.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryRepository;
    use crate::models::{MonitoredResource, Severity, TransitionCause};
    use crate::monitoring::types::{CheckSpec, CheckType};

    fn manager(policy: AutoResolvePolicy) -> IncidentManager {
        let config = IncidentConfig { auto_resolve: policy, ..IncidentConfig::default() };
        IncidentManager::new(Arc::new(MemoryRepository::new()), config)
    }

    fn transition(resource: &mut MonitoredResource, next: Status, at: DateTime<Utc>) -> StatusTransition {
        resource.transition_to(next, TransitionCause::ProbeFailure, Some("timeout".into()), at).unwrap()
    }

    fn check() -> MonitoredResource {
        MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 60)
            .with_severity(Severity::Critical)
    }

    #[tokio::test]
    async fn test_down_opens_one_incident_and_dedups() {
        let manager = manager(AutoResolvePolicy::Never);
        let mut resource = check();
        let now = Utc::now();

        let events = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        assert_eq!(events[0].kind, IncidentEventKind::Created);
        assert_eq!(events[0].incident.severity, Severity::Critical);
        assert_eq!(events[0].incident.title, "Check DOWN: api");

        // Recovery is only noted under Never, so the next failure is an occurrence
        manager.handle_transition(&transition(&mut resource, Status::Up, now)).await.unwrap();
        let events = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();

        assert_eq!(events[0].kind, IncidentEventKind::Occurrence);
        assert_eq!(events[0].incident.occurrence_count, 2);
        assert_eq!(manager.list_open(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_is_one_step_lower() {
        let manager = manager(AutoResolvePolicy::default());
        let mut resource = check();

        let events = manager.handle_transition(&transition(&mut resource, Status::Degraded, Utc::now())).await.unwrap();
        assert_eq!(events[0].incident.severity, Severity::High);
        assert_eq!(events[0].incident.cause, IncidentCause::Degraded);

        // Worsening to Down updates the open incident instead of opening another
        let events = manager.handle_transition(&transition(&mut resource, Status::Down, Utc::now())).await.unwrap();
        assert_eq!(events[0].kind, IncidentEventKind::StatusUpdate);
        assert_eq!(events[0].incident.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_auto_resolve_respects_ownership() {
        let manager = manager(AutoResolvePolicy::UnlessAcknowledged);
        let mut resource = check();
        let now = Utc::now();

        let created = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let id = created[0].incident.id;
        manager.apply(id, OperatorRequest::new(IncidentAction::Acknowledge, "alice"), now).await.unwrap();

        let events = manager.handle_transition(&transition(&mut resource, Status::Up, now)).await.unwrap();
        assert_eq!(events[0].kind, IncidentEventKind::RecoveredAwaitingOperator);
        assert_eq!(events[0].incident.status, IncidentStatus::Acknowledged);
    }

    #[tokio::test]
    async fn test_auto_resolve_unowned() {
        let manager = manager(AutoResolvePolicy::UnlessAcknowledged);
        let mut resource = check();
        let now = Utc::now();

        manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let events = manager.handle_transition(&transition(&mut resource, Status::Up, now)).await.unwrap();

        assert_eq!(events[0].kind, IncidentEventKind::AutoResolved);
        assert_eq!(events[0].incident.status, IncidentStatus::Resolved);
        assert_eq!(events[0].incident.resolution_sla_met, Some(true));
        assert!(manager.list_open(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operator_lifecycle() {
        let manager = manager(AutoResolvePolicy::Never);
        let mut resource = check();
        let now = Utc::now();

        let created = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let id = created[0].incident.id;

        let illegal = manager.apply(id, OperatorRequest::new(IncidentAction::Resolve, "alice"), now).await;
        assert!(matches!(illegal, Err(IncidentError::IllegalTransition { .. })));

        manager.apply(id, OperatorRequest::new(IncidentAction::Acknowledge, "alice"), now).await.unwrap();
        let assigned = manager
            .apply(id, OperatorRequest::new(IncidentAction::Assign, "alice").with_assignee("bob"), now)
            .await
            .unwrap();
        assert_eq!(assigned.incident.assigned_to.as_deref(), Some("bob"));
        assert_eq!(assigned.incident.status, IncidentStatus::InProgress);

        let resolved = manager
            .apply(id, OperatorRequest::new(IncidentAction::Resolve, "bob").with_comment("restarted"), now)
            .await
            .unwrap();
        assert_eq!(resolved.incident.resolved_by.as_deref(), Some("bob"));
        assert_eq!(resolved.incident.timeline.last().unwrap().message, "Resolved by bob: restarted");

        manager.apply(id, OperatorRequest::new(IncidentAction::Close, "bob"), now).await.unwrap();
        let reopened = manager.apply(id, OperatorRequest::new(IncidentAction::Reopen, "carol"), now).await.unwrap();
        assert_eq!(reopened.incident.status, IncidentStatus::New);
        assert!(reopened.incident.acknowledged_at.is_none());
    }

    #[tokio::test]
    async fn test_reopen_refuses_duplicate_open_incident() {
        let manager = manager(AutoResolvePolicy::Always);
        let mut resource = check();
        let now = Utc::now();

        let first = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        manager.handle_transition(&transition(&mut resource, Status::Up, now)).await.unwrap();
        manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();

        let reopened =
            manager.apply(first[0].incident.id, OperatorRequest::new(IncidentAction::Reopen, "alice"), now).await;
        assert!(matches!(reopened, Err(IncidentError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_unknown_incident_and_missing_actor() {
        let manager = manager(AutoResolvePolicy::default());
        let now = Utc::now();

        let missing = manager.apply(Uuid::new_v4(), OperatorRequest::new(IncidentAction::Acknowledge, "alice"), now).await;
        assert!(matches!(missing, Err(IncidentError::NotFound(_))));

        let anonymous = manager.apply(Uuid::new_v4(), OperatorRequest::new(IncidentAction::Acknowledge, " "), now).await;
        assert!(matches!(anonymous, Err(IncidentError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_sla_lazy_read_and_sweep() {
        let manager = manager(AutoResolvePolicy::default());
        let mut resource = check();
        let now = Utc::now();

        let created = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let id = created[0].incident.id;
        let later = now + Duration::minutes(16);

        // Lazy read reports the breach without persisting it
        assert!(manager.get(id, later).await.unwrap().sla_response_breached);
        assert!(!manager.get(id, now).await.unwrap().sla_response_breached);

        let events = manager.pending_sla_breaches(later).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, IncidentEventKind::SlaBreached(SlaBreach::Response));
        manager.commit_sla_breach(&events[0], later).await.unwrap();

        assert!(manager.pending_sla_breaches(later).await.unwrap().is_empty());
        assert!(manager.get(id, now).await.unwrap().sla_response_breached);
    }

    #[tokio::test]
    async fn test_replayed_transition_changes_nothing() {
        let manager = manager(AutoResolvePolicy::Always);
        let mut resource = check();
        let now = Utc::now();

        let down = transition(&mut resource, Status::Down, now);
        let first = manager.handle_transition(&down).await.unwrap();
        let again = manager.handle_transition(&down).await.unwrap();

        assert_eq!(again[0].kind, IncidentEventKind::Created);
        assert_eq!(again[0].transition_id, Some(down.id));
        assert_eq!(again[0].incident.occurrence_count, 1);
        assert_eq!(again[0].incident.timeline, first[0].incident.timeline);

        let up = transition(&mut resource, Status::Up, now + Duration::minutes(5));
        manager.handle_transition(&up).await.unwrap();
        let again = manager.handle_transition(&up).await.unwrap();

        assert_eq!(again.len(), 1);
        assert_eq!(again[0].kind, IncidentEventKind::AutoResolved);
        assert_eq!(manager.repository.incidents_for(resource.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sla_breach_stays_pending_until_committed() {
        let manager = manager(AutoResolvePolicy::default());
        let mut resource = check();
        let now = Utc::now();
        manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let later = now + Duration::minutes(16);

        let pending = manager.pending_sla_breaches(later).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].incident.sla_response_breached);

        // Not committed, so the next sweep reports it again
        assert_eq!(manager.pending_sla_breaches(later).await.unwrap().len(), 1);

        assert!(manager.commit_sla_breach(&pending[0], later).await.unwrap());
        assert!(!manager.commit_sla_breach(&pending[0], later).await.unwrap());
        assert!(manager.pending_sla_breaches(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_escalate_unowned() {
        let manager = manager(AutoResolvePolicy::default());
        let mut resource = check();
        let now = Utc::now();

        let created = manager.handle_transition(&transition(&mut resource, Status::Down, now)).await.unwrap();
        let id = created[0].incident.id;

        let escalated = manager.escalate_unowned(id, "No response after 10 minutes", now).await.unwrap();
        assert_eq!(escalated.unwrap().incident.escalation_level, 1);

        manager.apply(id, OperatorRequest::new(IncidentAction::Acknowledge, "alice"), now).await.unwrap();
        assert!(manager.escalate_unowned(id, "again", now).await.unwrap().is_none());
    }
}
