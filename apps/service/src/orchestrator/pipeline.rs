//! Downstream processing of status transitions and probe results.
//!
//! Order per transition: incidents, notifications, live updates, then the
//! outbox row is marked processed. A failure leaves the row pending so it is
//! replayed at the next start or outbox sweep. Replays are idempotent: an
//! incident remembers the transitions it applied and the router skips rules
//! that already notified for a transition.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::database::Repository;
use crate::events::{EngineEvent, IncidentEvent, IncidentEventKind};
use crate::incidents::IncidentManager;
use crate::locks::KeyedMutex;
use crate::models::{ResourceKind, ResourceRef, StatusTransition};
use crate::monitoring::{ProbeResult, ProbeResultSink};
use crate::notifications::{AlertEvent, NotificationRouter};
use crate::realtime::{RealtimeEvent, RealtimePublisher};
use crate::status::{StatusTracker, TransitionListener};

pub struct EventPipeline {
    repository: Arc<dyn Repository>,
    incidents: Arc<IncidentManager>,
    router: Arc<NotificationRouter>,
    publisher: Arc<RealtimePublisher>,
    events: broadcast::Sender<EngineEvent>,
    /// Transitions being processed right now
    in_flight: KeyedMutex<Uuid>,
}

impl EventPipeline {
    pub fn new(
        repository: Arc<dyn Repository>,
        incidents: Arc<IncidentManager>,
        router: Arc<NotificationRouter>,
        publisher: Arc<RealtimePublisher>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { repository, incidents, router, publisher, events, in_flight: KeyedMutex::new() }
    }

    /// Process one transition. Returns without doing anything when another
    /// task is already processing it.
    pub async fn process(&self, transition: &StatusTransition) -> Result<()> {
        let Some(_processing) = self.in_flight.try_lock(&transition.id) else {
            debug!("Transition {} is already being processed", transition.id);
            return Ok(());
        };

        debug!(
            resource_id = %transition.resource.id,
            "Processing {} transition {} -> {}",
            transition.resource.kind, transition.previous, transition.current
        );
        let _ = self.events.send(EngineEvent::StatusChanged(transition.clone()));

        let incident_events = self.incidents.handle_transition(transition).await?;
        let incident = incident_events
            .iter()
            .find(|event| {
                matches!(
                    event.kind,
                    IncidentEventKind::Created | IncidentEventKind::Occurrence | IncidentEventKind::StatusUpdate
                )
            })
            .map(|event| &event.incident);

        if let Some(alert) = AlertEvent::from_transition(transition, incident) {
            self.router.route(&alert).await?;
        }

        self.publish_transition(transition).await;
        self.process_incident_events(&incident_events, transition.at).await?;

        self.repository.mark_transition_processed(transition.id).await
    }

    /// Route and publish incident changes that did not come from a transition
    /// as well as the ones that did
    pub async fn process_incident_events(&self, events: &[IncidentEvent], at: DateTime<Utc>) -> Result<()> {
        for event in events {
            self.router.route_incident(event, at).await?;
            self.publisher.publish_for(&event.incident.resource, RealtimeEvent::from_incident(event)).await;
            let _ = self.events.send(EngineEvent::Incident(event.clone()));
        }
        Ok(())
    }

    async fn publish_transition(&self, transition: &StatusTransition) {
        let metrics = if transition.resource.kind == ResourceKind::Host {
            match self.repository.get_resource(transition.resource.id).await {
                Ok(resource) => resource.and_then(|host| host.host_spec().and_then(|spec| spec.last_metrics.clone())),
                Err(e) => {
                    debug!("Host metrics unavailable for {}: {:#}", transition.resource.name, e);
                    None
                }
            }
        } else {
            None
        };

        if let Some(event) = RealtimeEvent::from_transition(transition, metrics) {
            self.publisher.publish_for(&transition.resource, event).await;
        }
    }

    /// Process transitions committed at or before `cutoff` that were never
    /// marked processed
    pub async fn replay_pending(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let pending: Vec<StatusTransition> = self
            .repository
            .pending_transitions()
            .await?
            .into_iter()
            .filter(|transition| transition.at <= cutoff)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        info!("Replaying {} unprocessed transition(s)", pending.len());
        let mut replayed = 0;
        for transition in &pending {
            match self.process(transition).await {
                Ok(()) => replayed += 1,
                Err(e) => error!("Failed to replay transition {}: {:#}", transition.id, e),
            }
        }
        Ok(replayed)
    }
}

#[async_trait::async_trait]
impl TransitionListener for EventPipeline {
    async fn on_transition(&self, transition: &StatusTransition) {
        if let Err(e) = self.process(transition).await {
            error!(
                resource_id = %transition.resource.id,
                "Failed to process transition {} for {}: {:#}",
                transition.id, transition.resource.name, e
            );
        }
    }
}

/// Feeds scheduler results into the status tracker and the live stream
pub struct StatusSink {
    repository: Arc<dyn Repository>,
    tracker: Arc<StatusTracker>,
    publisher: Arc<RealtimePublisher>,
    events: broadcast::Sender<EngineEvent>,
}

impl StatusSink {
    pub fn new(
        repository: Arc<dyn Repository>,
        tracker: Arc<StatusTracker>,
        publisher: Arc<RealtimePublisher>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self { repository, tracker, publisher, events }
    }

    /// Apply one result. Returns the transition it caused, if any.
    pub async fn apply(&self, result: &ProbeResult) -> Result<Option<StatusTransition>> {
        let transition = self.tracker.record_probe(result).await?;

        let resource = match &transition {
            Some(transition) => Some(transition.resource.clone()),
            None => self.repository.get_resource(result.resource_id).await?.map(|resource| ResourceRef::from(&resource)),
        };

        if let Some(resource) = resource {
            let status = transition.as_ref().map(|transition| transition.current);
            self.publisher.publish_for(&resource, RealtimeEvent::check_result(&resource, result, status)).await;
            let _ = self.events.send(EngineEvent::ProbeCompleted { resource, result: result.clone() });
        }

        Ok(transition)
    }
}

#[async_trait::async_trait]
impl ProbeResultSink for StatusSink {
    async fn handle(&self, result: ProbeResult) {
        if let Err(e) = self.apply(&result).await {
            error!(resource_id = %result.resource_id, "Failed to record probe result: {:#}", e);
        }
    }
}
