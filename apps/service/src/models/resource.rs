use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::heartbeat::HostMetrics;
use crate::monitoring::types::CheckSpec;

/// Health status of a monitored resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
    Warning,
    Degraded,
    Maintenance,
    Unknown,
}

impl Status {
    /// Statuses that open incidents
    pub fn is_bad(self) -> bool {
        matches!(self, Status::Down | Status::Degraded)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => write!(f, "up"),
            Status::Down => write!(f, "down"),
            Status::Warning => write!(f, "warning"),
            Status::Degraded => write!(f, "degraded"),
            Status::Maintenance => write!(f, "maintenance"),
            Status::Unknown => write!(f, "unknown"),
        }
    }
}

/// Criticality of a resource or incident. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step less severe, saturating at `Info`
    pub fn lower(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::Info => Severity::Info,
        }
    }

    /// One step more severe, saturating at `Critical`
    pub fn raise(self) -> Self {
        match self {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Host,
    Check,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Host => write!(f, "host"),
            ResourceKind::Check => write!(f, "check"),
            ResourceKind::Service => write!(f, "service"),
        }
    }
}

/// Metric thresholds (percent) used to derive a host's status from a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostThresholds {
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub ram_warning: f64,
    pub ram_critical: f64,
    pub disk_warning: f64,
    pub disk_critical: f64,
}

impl Default for HostThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            cpu_critical: 95.0,
            ram_warning: 80.0,
            ram_critical: 95.0,
            disk_warning: 80.0,
            disk_critical: 95.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Hex encoded SHA-256 of the agent's secret key
    pub api_key_hash: String,
    /// Overrides the engine-wide down threshold
    #[serde(default)]
    pub down_threshold_seconds: Option<u64>,
    #[serde(default)]
    pub thresholds: HostThresholds,
    /// Latest metrics reported by the agent
    #[serde(default)]
    pub last_metrics: Option<HostMetrics>,
    #[serde(default)]
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,
    pub service_type: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Kind specific configuration of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceSpec {
    Host(HostSpec),
    Check(CheckSpec),
    Service(ServiceSpec),
}

/// A scheduled or manual maintenance window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub starts_at: DateTime<Utc>,
    /// Open ended when `None`; only a manual end clears it
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl MaintenanceWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at && self.ends_at.is_none_or(|end| now < end)
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| now >= end)
    }
}

/// A host, check or service whose health is tracked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    pub id: Uuid,
    pub name: String,
    pub spec: ResourceSpec,
    pub customer_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    /// Owning host for services and host-bound checks
    pub host_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub severity: Severity,

    pub status: Status,
    /// Status the resource would have without maintenance pinning
    pub last_known_status: Status,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,

    pub monitoring_enabled: bool,
    pub interval_seconds: u64,
    pub maintenance: Option<MaintenanceWindow>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredResource {
    fn new(name: String, spec: ResourceSpec, severity: Severity, interval_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            spec,
            customer_id: None,
            organization_id: None,
            host_id: None,
            tags: Vec::new(),
            severity,
            status: Status::Unknown,
            last_known_status: Status::Unknown,
            status_changed_at: None,
            last_seen_at: None,
            last_check_at: None,
            consecutive_failures: 0,
            failure_threshold: 1,
            monitoring_enabled: true,
            interval_seconds,
            maintenance: None,
            created_at: Utc::now(),
        }
    }

    /// New heartbeat-driven host. Hosts default to critical severity.
    pub fn host(name: impl Into<String>, api_key_hash: impl Into<String>) -> Self {
        let spec = HostSpec {
            api_key_hash: api_key_hash.into(),
            down_threshold_seconds: None,
            thresholds: HostThresholds::default(),
            last_metrics: None,
            agent_version: None,
        };
        Self::new(name.into(), ResourceSpec::Host(spec), Severity::Critical, 60)
    }

    /// New actively probed check
    pub fn check(name: impl Into<String>, spec: CheckSpec, interval_seconds: u64) -> Self {
        Self::new(name.into(), ResourceSpec::Check(spec), Severity::High, interval_seconds)
    }

    /// Service discovered on a host
    pub fn service(host: &MonitoredResource, spec: ServiceSpec) -> Self {
        let name = spec.display_name.clone().unwrap_or_else(|| spec.service_name.clone());
        let mut service = Self::new(name, ResourceSpec::Service(spec), Severity::High, host.interval_seconds);
        service.host_id = Some(host.id);
        service.customer_id = host.customer_id;
        service.organization_id = host.organization_id;
        service.tags = host.tags.clone();
        service
    }

    pub fn with_customer(mut self, customer_id: Uuid) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        match self.spec {
            ResourceSpec::Host(_) => ResourceKind::Host,
            ResourceSpec::Check(_) => ResourceKind::Check,
            ResourceSpec::Service(_) => ResourceKind::Service,
        }
    }

    pub fn check_spec(&self) -> Option<&CheckSpec> {
        match &self.spec {
            ResourceSpec::Check(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn host_spec(&self) -> Option<&HostSpec> {
        match &self.spec {
            ResourceSpec::Host(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn host_spec_mut(&mut self) -> Option<&mut HostSpec> {
        match &mut self.spec {
            ResourceSpec::Host(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn service_spec(&self) -> Option<&ServiceSpec> {
        match &self.spec {
            ResourceSpec::Service(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn in_maintenance(&self, now: DateTime<Utc>) -> bool {
        self.maintenance.as_ref().is_some_and(|window| window.is_active(now))
    }

    /// Host id used for `host_{id}` fan-out: the resource itself for hosts
    pub fn owning_host(&self) -> Option<Uuid> {
        match self.kind() {
            ResourceKind::Host => Some(self.id),
            _ => self.host_id,
        }
    }

    /// Whether a host's heartbeat is older than `threshold` at `now`
    pub fn heartbeat_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.last_seen_at.is_some_and(|seen| now - seen >= threshold)
    }

    /// Build the transition record for a status change and apply it
    pub fn transition_to(
        &mut self,
        next: Status,
        cause: TransitionCause,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        if self.status == next {
            return None;
        }

        let transition = StatusTransition {
            id: Uuid::new_v4(),
            resource: ResourceRef::from(&*self),
            previous: self.status,
            current: next,
            at: now,
            cause,
            detail,
        };

        self.status = next;
        self.status_changed_at = Some(now);
        Some(transition)
    }
}

/// Denormalized identity of a resource carried by events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: Uuid,
    pub kind: ResourceKind,
    pub name: String,
    pub customer_id: Option<Uuid>,
    pub host_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub severity: Severity,
}

impl From<&MonitoredResource> for ResourceRef {
    fn from(resource: &MonitoredResource) -> Self {
        Self {
            id: resource.id,
            kind: resource.kind(),
            name: resource.name.clone(),
            customer_id: resource.customer_id,
            host_id: resource.owning_host(),
            tags: resource.tags.clone(),
            severity: resource.severity,
        }
    }
}

/// What caused a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    ProbeFailure,
    ProbeSuccess,
    SlowResponse,
    Heartbeat,
    HeartbeatTimeout,
    ServiceReport,
    MaintenanceStarted,
    MaintenanceEnded,
}

/// A single accepted status change. The only trigger for downstream work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: Uuid,
    pub resource: ResourceRef,
    pub previous: Status,
    pub current: Status,
    pub at: DateTime<Utc>,
    pub cause: TransitionCause,
    pub detail: Option<String>,
}

impl StatusTransition {
    /// Recovery to Up from any non-healthy class
    pub fn is_recovery(&self) -> bool {
        self.current == Status::Up && matches!(self.previous, Status::Down | Status::Degraded | Status::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::CheckType;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Info < Severity::Low);
        assert_eq!(Severity::Critical.lower(), Severity::High);
        assert_eq!(Severity::Info.lower(), Severity::Info);
        assert_eq!(Severity::Critical.raise(), Severity::Critical);
    }

    #[test]
    fn test_transition_to_same_status_is_noop() {
        let mut check =
            MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 60);
        let now = Utc::now();

        assert!(check.transition_to(Status::Up, TransitionCause::ProbeSuccess, None, now).is_some());
        assert!(check.transition_to(Status::Up, TransitionCause::ProbeSuccess, None, now).is_none());
        assert_eq!(check.status_changed_at, Some(now));
    }

    #[test]
    fn test_maintenance_window_bounds() {
        let start = Utc::now();
        let window = MaintenanceWindow {
            starts_at: start,
            ends_at: Some(start + Duration::minutes(30)),
            reason: None,
        };

        assert!(!window.is_active(start - Duration::seconds(1)));
        assert!(window.is_active(start));
        assert!(!window.is_active(start + Duration::minutes(30)));
        assert!(window.has_expired(start + Duration::minutes(30)));
    }

    #[test]
    fn test_service_inherits_host_scope() {
        let customer = Uuid::new_v4();
        let host = MonitoredResource::host("web-01", "hash").with_customer(customer);
        let service = MonitoredResource::service(
            &host,
            ServiceSpec { service_name: "nginx".into(), service_type: "SystemdUnit".into(), display_name: None },
        );

        assert_eq!(service.host_id, Some(host.id));
        assert_eq!(service.customer_id, Some(customer));
        assert_eq!(service.owning_host(), Some(host.id));
        assert_eq!(host.owning_host(), Some(host.id));
    }
}
