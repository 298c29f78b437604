/// Orchestrator module - wires every engine component together
///
/// The engine:
/// - Owns the scheduler, status tracker, incident manager, notification
///   router, delivery worker and real-time publisher
/// - Routes every status transition through the event pipeline
/// - Runs the periodic sweeps and shuts all of it down on cancellation
/// - Exposes the operator surface used by the HTTP adapter
pub mod pipeline;
pub mod retention;
pub mod sweeps;

#[cfg(test)]
mod tests;

pub use pipeline::{EventPipeline, StatusSink};
pub use retention::{RetentionCleanup, RetentionPolicy};
pub use sweeps::{SweepIntervals, Sweeps};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, Seeds};
use crate::database::Repository;
use crate::error::{HeartbeatError, IncidentError, OperationError, ProvisionError};
use crate::events::EngineEvent;
use crate::incidents::{IncidentConfig, IncidentManager, OperatorRequest};
use crate::models::{
    AgentCommand, HeartbeatAck, HeartbeatRequest, Incident, MaintenanceWindow, MonitoredResource, NotificationChannel,
    NotificationDispatch, NotificationRule, ResourceKind, StatusTransition,
};
use crate::monitoring::validation::{ValidationPolicy, validate_check, validate_host};
use crate::monitoring::{
    CheckerRegistry, MonitoringScheduler, ProbeClaims, ProbeExecutor, ProbeResult, SchedulerConfig,
};
use crate::notifications::{ChannelRegistry, DeliveryConfig, DeliveryQueue, DeliveryWorker, NotificationRouter, RouterConfig};
use crate::realtime::RealtimePublisher;
use crate::status::{HeartbeatService, StatusTracker, TrackerConfig, hash_api_key};

const EVENT_BUFFER: usize = 256;

/// Tunables for every engine component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub tracker: TrackerConfig,
    pub incidents: IncidentConfig,
    pub router: RouterConfig,
    pub delivery: DeliveryConfig,
    pub sweeps: SweepIntervals,
    pub retention: RetentionPolicy,
    pub validation: ValidationPolicy,
    pub delivery_queue_capacity: usize,
    pub realtime_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            tracker: TrackerConfig::default(),
            incidents: IncidentConfig::default(),
            router: RouterConfig::default(),
            delivery: DeliveryConfig::default(),
            sweeps: SweepIntervals::default(),
            retention: RetentionPolicy::default(),
            validation: ValidationPolicy::default(),
            delivery_queue_capacity: 1024,
            realtime_buffer: 64,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        config.engine_config()
    }
}

/// Main engine for the Vigil service
pub struct Engine {
    repository: Arc<dyn Repository>,
    executor: ProbeExecutor,
    claims: Arc<ProbeClaims>,
    scheduler: Arc<MonitoringScheduler>,
    sink: Arc<StatusSink>,
    tracker: Arc<StatusTracker>,
    heartbeats: HeartbeatService,
    incidents: Arc<IncidentManager>,
    router: Arc<NotificationRouter>,
    delivery: Arc<DeliveryWorker>,
    delivery_queue: Mutex<Option<mpsc::Receiver<Uuid>>>,
    publisher: Arc<RealtimePublisher>,
    pipeline: Arc<EventPipeline>,
    sweeps: Arc<Sweeps>,
    retention: Arc<RetentionCleanup>,
    events: broadcast::Sender<EngineEvent>,
    validation: ValidationPolicy,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Engine {
    pub fn new(
        repository: Arc<dyn Repository>,
        checkers: CheckerRegistry,
        channels: ChannelRegistry,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let publisher = Arc::new(RealtimePublisher::new(config.realtime_buffer));

        let incidents = Arc::new(IncidentManager::new(repository.clone(), config.incidents));
        let (queue, delivery_queue) = DeliveryQueue::channel(config.delivery_queue_capacity);
        let router = Arc::new(NotificationRouter::new(repository.clone(), queue, config.router));
        let delivery = Arc::new(DeliveryWorker::new(repository.clone(), channels, config.delivery));

        let pipeline = Arc::new(EventPipeline::new(
            repository.clone(),
            incidents.clone(),
            router.clone(),
            publisher.clone(),
            events.clone(),
        ));
        let tracker =
            Arc::new(StatusTracker::new(repository.clone(), config.tracker).with_listener(pipeline.clone()));
        let heartbeats = HeartbeatService::new(repository.clone(), tracker.clone());

        let executor = ProbeExecutor::new(checkers);
        let sink = Arc::new(StatusSink::new(repository.clone(), tracker.clone(), publisher.clone(), events.clone()));
        let claims = Arc::new(ProbeClaims::new());
        let scheduler = Arc::new(
            MonitoringScheduler::new(executor.clone(), repository.clone(), sink.clone(), config.scheduler)
                .with_claims(claims.clone()),
        );

        let sweeps = Arc::new(Sweeps::new(
            tracker.clone(),
            incidents.clone(),
            router.clone(),
            pipeline.clone(),
            config.sweeps,
        ));

        let retention = Arc::new(RetentionCleanup::new(repository.clone(), config.retention));

        Self {
            repository,
            executor,
            claims,
            scheduler,
            sink,
            tracker,
            heartbeats,
            incidents,
            router,
            delivery,
            delivery_queue: Mutex::new(Some(delivery_queue)),
            publisher,
            pipeline,
            sweeps,
            retention,
            events,
            validation: config.validation,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Engine with the stock probes and channel adapters
    pub fn with_defaults(repository: Arc<dyn Repository>, config: EngineConfig) -> Result<Self> {
        let checkers = CheckerRegistry::with_defaults()?;
        let channels = ChannelRegistry::with_defaults(config.delivery.attempt_timeout)?;
        Ok(Self::new(repository, checkers, channels, config))
    }

    /// Replay the transition outbox, then start the scheduler, the delivery
    /// worker and the sweeps
    pub async fn start(&self) -> Result<()> {
        let queue = self
            .delivery_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow!("Engine already started"))?;

        let replayed = self.pipeline.replay_pending(Utc::now()).await?;
        if replayed > 0 {
            info!("Recovered {} transition(s) from the outbox", replayed);
        }

        self.tasks.spawn(self.delivery.clone().run(queue, self.shutdown.clone()));

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            if let Err(e) = scheduler.run(shutdown).await {
                error!("Scheduler stopped with error: {:#}", e);
            }
        });

        self.sweeps.spawn(&self.tasks, &self.shutdown);
        self.retention.clone().start_periodic_cleanup(&self.tasks, self.shutdown.clone());

        info!("Engine started");
        Ok(())
    }

    /// Cancel every background task and wait for them, at most `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        info!("Shutting down engine...");
        self.shutdown.cancel();
        self.tasks.close();

        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!("Engine tasks did not stop within {}s", timeout.as_secs());
        } else {
            info!("Engine stopped");
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stream of engine events. Slow subscribers miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn publisher(&self) -> Arc<RealtimePublisher> {
        self.publisher.clone()
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    pub fn sweeps(&self) -> Arc<Sweeps> {
        self.sweeps.clone()
    }

    /// Validate and store a resource. Checks join the schedule on its next reload.
    pub async fn provision(&self, resource: MonitoredResource) -> Result<MonitoredResource, ProvisionError> {
        match resource.kind() {
            ResourceKind::Check => validate_check(&resource, self.validation)?,
            ResourceKind::Host => validate_host(&resource)?,
            ResourceKind::Service => {}
        }
        self.repository.save_resource(&resource).await?;
        info!(resource_id = %resource.id, "Provisioned {} '{}'", resource.kind(), resource.name);
        Ok(resource)
    }

    pub async fn remove_resource(&self, id: Uuid) -> Result<()> {
        self.repository.delete_resource(id).await?;
        info!(resource_id = %id, "Removed resource");
        Ok(())
    }

    pub async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        self.repository.save_channel(channel).await
    }

    pub async fn save_rule(&self, rule: &NotificationRule) -> Result<()> {
        self.repository.save_rule(rule).await
    }

    /// Provision configured resources, channels and rules. Hosts are matched by
    /// API key and checks by name, so re-running against a persistent
    /// database does not duplicate them.
    pub async fn apply_seeds(&self, seeds: &Seeds) -> Result<()> {
        let existing = self.repository.list_resources().await?;

        for seed in &seeds.hosts {
            if self.repository.host_by_api_key(&hash_api_key(&seed.api_key)).await?.is_some() {
                continue;
            }
            self.provision(seed.to_resource()).await?;
        }

        for seed in &seeds.checks {
            if existing.iter().any(|r| r.kind() == ResourceKind::Check && r.name == seed.name) {
                continue;
            }
            self.provision(seed.to_resource()).await?;
        }

        for channel in &seeds.channels {
            self.save_channel(channel).await?;
        }
        for rule in &seeds.rules {
            self.save_rule(rule).await?;
        }

        info!(
            "Applied seeds: {} host(s), {} check(s), {} channel(s), {} rule(s)",
            seeds.hosts.len(),
            seeds.checks.len(),
            seeds.channels.len(),
            seeds.rules.len()
        );
        Ok(())
    }

    pub async fn ingest_heartbeat(
        &self,
        api_key: &str,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatAck, HeartbeatError> {
        self.heartbeats.ingest(api_key, request, now).await
    }

    async fn existing(&self, resource_id: Uuid) -> Result<MonitoredResource, OperationError> {
        self.repository
            .get_resource(resource_id)
            .await?
            .ok_or(OperationError::NotFound("Resource", resource_id))
    }

    pub async fn queue_command(
        &self,
        host_id: Uuid,
        command_type: &str,
        payload: Option<String>,
    ) -> Result<AgentCommand, OperationError> {
        let host = self.existing(host_id).await?;
        if host.kind() != ResourceKind::Host {
            return Err(OperationError::WrongKind(host.name, "host"));
        }
        Ok(self.heartbeats.queue_command(host_id, command_type, payload, Utc::now()).await?)
    }

    /// Probe a check immediately, outside its schedule. Waits for a scheduled
    /// probe of the same check to finish first.
    pub async fn probe_now(&self, resource_id: Uuid) -> Result<ProbeResult, OperationError> {
        let _claim = self.claims.lock(&resource_id).await;

        let resource = self.existing(resource_id).await?;
        let Some(spec) = resource.check_spec() else {
            return Err(OperationError::WrongKind(resource.name, "check"));
        };

        let result = self.executor.execute(resource.id, spec).await;
        self.sink.apply(&result).await?;
        Ok(result)
    }

    pub async fn start_maintenance(
        &self,
        resource_id: Uuid,
        window: MaintenanceWindow,
    ) -> Result<Option<StatusTransition>, OperationError> {
        self.existing(resource_id).await?;
        Ok(self.tracker.start_maintenance(resource_id, window, Utc::now()).await?)
    }

    pub async fn end_maintenance(&self, resource_id: Uuid) -> Result<Vec<StatusTransition>, OperationError> {
        self.existing(resource_id).await?;
        Ok(self.tracker.end_maintenance(resource_id, Utc::now()).await?)
    }

    pub async fn incident(&self, id: Uuid) -> Result<Incident, IncidentError> {
        self.incidents.get(id, Utc::now()).await
    }

    pub async fn open_incidents(&self) -> Result<Vec<Incident>> {
        self.incidents.list_open(Utc::now()).await
    }

    /// Apply an operator action, then notify and publish it. The action is
    /// stored before downstream work, so a routing failure does not undo it.
    pub async fn incident_action(&self, id: Uuid, request: OperatorRequest) -> Result<Incident, IncidentError> {
        let now = Utc::now();
        let event = self.incidents.apply(id, request, now).await?;
        if let Err(e) = self.pipeline.process_incident_events(std::slice::from_ref(&event), now).await {
            error!("Failed to route {:?} for incident #{}: {:#}", event.kind, event.incident.number, e);
        }
        Ok(event.incident)
    }

    /// Record a provider receipt for a sent notification
    pub async fn mark_delivered(
        &self,
        dispatch_id: Uuid,
        external_id: Option<String>,
    ) -> Result<NotificationDispatch, OperationError> {
        if self.repository.get_dispatch(dispatch_id).await?.is_none() {
            return Err(OperationError::NotFound("Dispatch", dispatch_id));
        }
        Ok(self.delivery.mark_delivered(dispatch_id, external_id).await?)
    }

    /// Attempt every due dispatch once, in place of the background worker
    pub async fn deliver_due(&self, now: DateTime<Utc>) -> Result<Vec<NotificationDispatch>> {
        let due = self.delivery.due(now).await?;
        let attempts = due.into_iter().map(|id| self.delivery.deliver(id, now));
        let attempted = futures::future::try_join_all(attempts).await?;
        Ok(attempted.into_iter().flatten().collect())
    }

    pub fn pending_escalations(&self) -> usize {
        self.router.pending_escalations()
    }
}
