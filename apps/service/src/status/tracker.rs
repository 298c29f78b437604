use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::Repository;
use crate::locks::KeyedMutex;
use crate::models::resource::{HostThresholds, ServiceSpec};
use crate::models::{
    HeartbeatRequest, HostMetrics, MaintenanceWindow, MonitoredResource, ResourceKind, ServiceReport, Status,
    StatusTransition, TransitionCause,
};
use crate::monitoring::types::ProbeResult;

/// Receives every committed transition while the resource is still locked,
/// so downstream work for one resource happens in transition order
#[async_trait::async_trait]
pub trait TransitionListener: Send + Sync {
    async fn on_transition(&self, transition: &StatusTransition);
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Engine-wide heartbeat silence after which a host is down
    pub down_threshold: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { down_threshold: Duration::seconds(90) }
    }
}

/// Outcome of one heartbeat
#[derive(Debug, Default)]
pub struct HeartbeatOutcome {
    pub host_transition: Option<StatusTransition>,
    pub service_transitions: Vec<StatusTransition>,
    pub discovered_services: usize,
}

/// Status a check should have after `result`. Updates the failure counter.
///
/// Failures only count towards `Down` once the threshold is reached; any
/// success recovers immediately.
fn evaluate_probe(resource: &mut MonitoredResource, result: &ProbeResult) -> (Status, TransitionCause) {
    if result.success {
        resource.consecutive_failures = 0;
        if result.degraded {
            (Status::Degraded, TransitionCause::SlowResponse)
        } else {
            (Status::Up, TransitionCause::ProbeSuccess)
        }
    } else {
        resource.consecutive_failures = resource.consecutive_failures.saturating_add(1);
        if resource.consecutive_failures >= resource.failure_threshold {
            (Status::Down, TransitionCause::ProbeFailure)
        } else {
            (resource.last_known_status, TransitionCause::ProbeFailure)
        }
    }
}

/// Derive a host's status from the metrics it reported.
///
/// A critical metric wins over everything else, then stopped services,
/// then warning-level metrics.
pub fn derive_host_status(request: &HeartbeatRequest, thresholds: &HostThresholds) -> (Status, Option<String>) {
    let system = &request.system;
    let mut critical = Vec::new();
    let mut warnings = Vec::new();

    let mut grade = |value: f64, warning: f64, critical_at: f64, label: String| {
        if value >= critical_at {
            critical.push(format!("{} {:.1}%", label, value));
        } else if value >= warning {
            warnings.push(format!("{} {:.1}%", label, value));
        }
    };
    grade(system.cpu_percent, thresholds.cpu_warning, thresholds.cpu_critical, "CPU".into());
    grade(system.ram_percent, thresholds.ram_warning, thresholds.ram_critical, "RAM".into());
    for disk in &request.disks {
        grade(disk.used_percent, thresholds.disk_warning, thresholds.disk_critical, format!("Disk {}", disk.name));
    }

    if !critical.is_empty() {
        return (Status::Warning, Some(format!("Critical: {}", critical.join(", "))));
    }

    let failed: Vec<&str> = request
        .services
        .iter()
        .filter(|service| matches!(service_status(service), Status::Down))
        .map(|service| service.name.as_str())
        .collect();
    if !failed.is_empty() {
        return (Status::Degraded, Some(format!("Services not running: {}", failed.join(", "))));
    }

    if warnings.is_empty() { (Status::Up, None) } else { (Status::Warning, Some(warnings.join(", "))) }
}

/// Map an agent reported service state onto a status
pub fn service_status(report: &ServiceReport) -> Status {
    match report.status.to_ascii_lowercase().as_str() {
        "running" | "started" | "active" => Status::Up,
        "stopped" | "failed" | "inactive" => Status::Down,
        "starting" | "stopping" | "paused" => Status::Warning,
        "degraded" => Status::Degraded,
        _ => Status::Unknown,
    }
}

/// Record the real status and decide which transition, if any, it produces.
///
/// Maintenance pins the visible status while `last_known_status` keeps
/// tracking reality. `suppressed` does the same without pinning.
fn settle(
    resource: &mut MonitoredResource,
    real: Status,
    cause: TransitionCause,
    detail: Option<String>,
    suppressed: bool,
    now: DateTime<Utc>,
) -> Option<StatusTransition> {
    resource.last_known_status = real;

    if !resource.monitoring_enabled || suppressed {
        return None;
    }

    if resource.in_maintenance(now) {
        let reason = resource.maintenance.as_ref().and_then(|window| window.reason.clone());
        return resource.transition_to(Status::Maintenance, TransitionCause::MaintenanceStarted, reason, now);
    }

    if resource.status == Status::Maintenance {
        resource.maintenance = None;
        return resource.transition_to(real, TransitionCause::MaintenanceEnded, detail, now);
    }

    resource.transition_to(real, cause, detail, now)
}

/// Status tracker - the only writer of resource status
pub struct StatusTracker {
    repository: Arc<dyn Repository>,
    locks: KeyedMutex<Uuid>,
    listener: Option<Arc<dyn TransitionListener>>,
    config: TrackerConfig,
}

impl StatusTracker {
    pub fn new(repository: Arc<dyn Repository>, config: TrackerConfig) -> Self {
        Self { repository, locks: KeyedMutex::new(), listener: None, config }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn down_threshold(&self, host: &MonitoredResource) -> Duration {
        host.host_spec()
            .and_then(|spec| spec.down_threshold_seconds)
            .and_then(|seconds| Duration::try_seconds(i64::try_from(seconds).ok()?))
            .unwrap_or(self.config.down_threshold)
    }

    async fn load(&self, id: Uuid) -> Result<MonitoredResource> {
        self.repository.get_resource(id).await?.ok_or_else(|| anyhow!("Resource {} not found", id))
    }

    /// Commit and notify. Callers hold the resource lock.
    async fn commit(
        &self,
        resource: &MonitoredResource,
        transition: Option<StatusTransition>,
        probe: Option<&ProbeResult>,
    ) -> Result<Option<StatusTransition>> {
        self.repository.commit_status(resource, transition.as_ref(), probe).await?;

        if let Some(transition) = &transition {
            info!(
                resource_id = %resource.id,
                kind = %resource.kind(),
                cause = ?transition.cause,
                "{} changed {} -> {}",
                resource.name,
                transition.previous,
                transition.current
            );
            if let Some(listener) = &self.listener {
                listener.on_transition(transition).await;
            }
        }

        Ok(transition)
    }

    /// Apply a probe result to its check
    pub async fn record_probe(&self, result: &ProbeResult) -> Result<Option<StatusTransition>> {
        let _guard = self.locks.lock(&result.resource_id).await;

        let Some(mut resource) = self.repository.get_resource(result.resource_id).await? else {
            debug!("Dropping probe result for deleted resource {}", result.resource_id);
            return Ok(None);
        };

        resource.last_check_at = Some(result.timestamp);
        let (real, cause) = evaluate_probe(&mut resource, result);
        let detail = result.error_message.clone();
        let transition = settle(&mut resource, real, cause, detail, false, result.timestamp);

        self.commit(&resource, transition, Some(result)).await
    }

    /// Apply a heartbeat to its host and the services it reports
    pub async fn record_heartbeat(
        &self,
        host_id: Uuid,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome> {
        let _guard = self.locks.lock(&host_id).await;

        let mut host = self.load(host_id).await?;
        let thresholds = match host.host_spec_mut() {
            Some(spec) => {
                spec.last_metrics = Some(HostMetrics::from(request));
                spec.agent_version = request.agent_version.clone().or(spec.agent_version.take());
                spec.thresholds
            }
            None => return Err(anyhow!("Resource {} is not a host", host_id)),
        };
        host.last_seen_at = Some(now);

        let (real, detail) = derive_host_status(request, &thresholds);
        let transition = settle(&mut host, real, TransitionCause::Heartbeat, detail, false, now);
        let host_transition = self.commit(&host, transition, None).await?;

        let mut outcome = HeartbeatOutcome { host_transition, ..HeartbeatOutcome::default() };
        let services = self.repository.services_of_host(host_id).await?;
        let suppressed = host.in_maintenance(now);

        for report in &request.services {
            let service = match services.iter().find(|service| {
                service.service_spec().is_some_and(|spec| spec.service_name == report.name)
            }) {
                Some(service) => service.id,
                None => {
                    let spec = ServiceSpec {
                        service_name: report.name.clone(),
                        service_type: report.service_type.clone(),
                        display_name: report.display_name.clone(),
                    };
                    let service = MonitoredResource::service(&host, spec);
                    self.repository.save_resource(&service).await?;
                    info!("Discovered service {} on host {}", report.name, host.name);
                    outcome.discovered_services += 1;
                    service.id
                }
            };

            if let Some(transition) = self.record_service(service, report, suppressed, now).await? {
                outcome.service_transitions.push(transition);
            }
        }

        Ok(outcome)
    }

    async fn record_service(
        &self,
        service_id: Uuid,
        report: &ServiceReport,
        suppressed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusTransition>> {
        let _guard = self.locks.lock(&service_id).await;

        let mut service = self.load(service_id).await?;
        service.last_seen_at = Some(now);
        service.last_check_at = Some(now);

        let real = service_status(report);
        let detail = (real != Status::Up).then(|| format!("Service reported {}", report.status));
        let transition = settle(&mut service, real, TransitionCause::ServiceReport, detail, suppressed, now);
        self.commit(&service, transition, None).await
    }

    /// Mark hosts whose heartbeat went silent as down. Hosts that never
    /// reported are left alone.
    pub async fn sweep_heartbeats(&self, now: DateTime<Utc>) -> Result<Vec<StatusTransition>> {
        let mut transitions = Vec::new();

        for candidate in self.repository.resources_of_kind(ResourceKind::Host).await? {
            if !candidate.monitoring_enabled
                || candidate.last_known_status == Status::Down
                || !candidate.heartbeat_stale(self.down_threshold(&candidate), now)
            {
                continue;
            }

            let _guard = self.locks.lock(&candidate.id).await;
            let Some(mut host) = self.repository.get_resource(candidate.id).await? else {
                continue;
            };
            // A heartbeat may have landed while waiting for the lock
            if host.last_known_status == Status::Down || !host.heartbeat_stale(self.down_threshold(&host), now) {
                continue;
            }

            let silence = host.last_seen_at.map(|seen| (now - seen).num_seconds()).unwrap_or_default();
            warn!("Host {} has not sent a heartbeat for {}s", host.name, silence);
            let detail = Some(format!("No heartbeat for {} seconds", silence));
            let transition = settle(&mut host, Status::Down, TransitionCause::HeartbeatTimeout, detail, false, now);

            if let Some(transition) = self.commit(&host, transition, None).await? {
                transitions.push(transition);
            }
        }

        Ok(transitions)
    }

    /// Put a resource in maintenance. A window starting later is activated by
    /// [`Self::sweep_maintenance`].
    pub async fn start_maintenance(
        &self,
        resource_id: Uuid,
        window: MaintenanceWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<StatusTransition>> {
        let _guard = self.locks.lock(&resource_id).await;

        let mut resource = self.load(resource_id).await?;
        let active = window.is_active(now);
        let reason = window.reason.clone();
        resource.maintenance = Some(window);

        let transition = if active && resource.monitoring_enabled {
            resource.transition_to(Status::Maintenance, TransitionCause::MaintenanceStarted, reason, now)
        } else {
            None
        };
        self.commit(&resource, transition, None).await
    }

    /// End maintenance now and restore the real status
    pub async fn end_maintenance(&self, resource_id: Uuid, now: DateTime<Utc>) -> Result<Vec<StatusTransition>> {
        let transition = {
            let _guard = self.locks.lock(&resource_id).await;
            let mut resource = self.load(resource_id).await?;
            resource.maintenance = None;
            let transition = self.restore(&mut resource, now);
            let transition = self.commit(&resource, transition, None).await?;
            (transition, resource.kind())
        };

        let mut transitions: Vec<StatusTransition> = transition.0.into_iter().collect();
        if transition.1 == ResourceKind::Host {
            transitions.extend(self.reconcile_services(resource_id, now).await?);
        }
        Ok(transitions)
    }

    /// Leave the pinned `Maintenance` status for the real one. Hosts are
    /// re-checked for heartbeat staleness first.
    fn restore(&self, resource: &mut MonitoredResource, now: DateTime<Utc>) -> Option<StatusTransition> {
        if resource.status != Status::Maintenance || !resource.monitoring_enabled {
            return None;
        }

        if resource.kind() == ResourceKind::Host && resource.heartbeat_stale(self.down_threshold(resource), now) {
            resource.last_known_status = Status::Down;
        }

        let real = resource.last_known_status;
        resource.transition_to(real, TransitionCause::MaintenanceEnded, None, now)
    }

    /// Catch services up with reports that arrived while their host was in maintenance
    async fn reconcile_services(&self, host_id: Uuid, now: DateTime<Utc>) -> Result<Vec<StatusTransition>> {
        let mut transitions = Vec::new();

        for candidate in self.repository.services_of_host(host_id).await? {
            let _guard = self.locks.lock(&candidate.id).await;
            let Some(mut service) = self.repository.get_resource(candidate.id).await? else {
                continue;
            };
            if !service.monitoring_enabled || service.in_maintenance(now) || service.status == service.last_known_status
            {
                continue;
            }

            let real = service.last_known_status;
            let transition = service.transition_to(real, TransitionCause::ServiceReport, None, now);
            if let Some(transition) = self.commit(&service, transition, None).await? {
                transitions.push(transition);
            }
        }

        Ok(transitions)
    }

    /// Activate due maintenance windows and end expired ones
    pub async fn sweep_maintenance(&self, now: DateTime<Utc>) -> Result<Vec<StatusTransition>> {
        let mut transitions = Vec::new();

        for candidate in self.repository.list_resources().await? {
            let Some(window) = &candidate.maintenance else {
                continue;
            };

            if window.has_expired(now) {
                info!("Maintenance window for {} expired", candidate.name);
                transitions.extend(self.end_maintenance(candidate.id, now).await?);
            } else if window.is_active(now) && candidate.status != Status::Maintenance && candidate.monitoring_enabled {
                let _guard = self.locks.lock(&candidate.id).await;
                let Some(mut resource) = self.repository.get_resource(candidate.id).await? else {
                    continue;
                };
                if !resource.in_maintenance(now) {
                    continue;
                }
                let reason = resource.maintenance.as_ref().and_then(|window| window.reason.clone());
                let transition =
                    resource.transition_to(Status::Maintenance, TransitionCause::MaintenanceStarted, reason, now);
                if let Some(transition) = self.commit(&resource, transition, None).await? {
                    transitions.push(transition);
                }
            }
        }

        Ok(transitions)
    }
}
