use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::incidents::{AutoResolvePolicy, IncidentConfig};
use crate::models::{MonitoredResource, NotificationChannel, NotificationRule, Severity};
use crate::monitoring::validation::{MAX_DOWN_THRESHOLD, MIN_DOWN_THRESHOLD, ValidationPolicy};
use crate::monitoring::{CheckSpec, SchedulerConfig};
use crate::notifications::{DeliveryConfig, RouterConfig};
use crate::orchestrator::{EngineConfig, RetentionPolicy, SweepIntervals};
use crate::status::{TrackerConfig, hash_api_key};

/// One year
const MAX_SLA_MINUTES: i64 = 525_600;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0}")]
    ReadFailed(String),
    #[error("Failed to write config: {0}")]
    WriteFailed(String),
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),
    #[error("No config path available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: Engine,
    pub heartbeat: Heartbeat,
    pub maintenance: Maintenance,
    pub incidents: Incidents,
    pub notifications: Notifications,
    pub realtime: Realtime,
    pub retention: Retention,
    pub database: Database,
    pub server: Server,
    pub seeds: Seeds,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    pub tick_ms: u64,
    pub max_concurrent_probes: usize,
    pub jitter_ms: u64,
    pub reload_seconds: u64,
    pub shutdown_grace_seconds: u64,
    /// How often unprocessed status transitions are retried
    pub outbox_sweep_seconds: u64,
    /// Refuse private/loopback check targets
    pub public_targets_only: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            max_concurrent_probes: 64,
            jitter_ms: 500,
            reload_seconds: 30,
            shutdown_grace_seconds: 10,
            outbox_sweep_seconds: 30,
            public_targets_only: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Heartbeat {
    pub down_threshold_seconds: u64,
    pub sweep_seconds: u64,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self { down_threshold_seconds: 90, sweep_seconds: 30 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Maintenance {
    pub sweep_seconds: u64,
}

impl Default for Maintenance {
    fn default() -> Self {
        Self { sweep_seconds: 60 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Incidents {
    pub response_sla_minutes: i64,
    pub resolution_sla_minutes: i64,
    pub auto_resolve: AutoResolvePolicy,
    pub sla_sweep_seconds: u64,
}

impl Default for Incidents {
    fn default() -> Self {
        Self {
            response_sla_minutes: 15,
            resolution_sla_minutes: 240,
            auto_resolve: AutoResolvePolicy::default(),
            sla_sweep_seconds: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub delivery_timeout_seconds: u64,
    pub retry_sweep_seconds: u64,
    pub escalation_sweep_seconds: u64,
    pub queue_capacity: usize,
    /// Events at or above this severity ignore working hours
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_notify_severity: Option<Severity>,
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_seconds: 30,
            backoff_max_seconds: 900,
            delivery_timeout_seconds: 15,
            retry_sweep_seconds: 10,
            escalation_sweep_seconds: 60,
            queue_capacity: 1024,
            always_notify_severity: Some(Severity::Critical),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Realtime {
    /// Events buffered per connection before new ones are dropped
    pub connection_buffer: usize,
}

impl Default for Realtime {
    fn default() -> Self {
        Self { connection_buffer: 64 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub probe_result_days: i64,
    pub transition_days: i64,
    pub cleanup_minutes: u64,
}

impl Default for Retention {
    fn default() -> Self {
        Self { probe_result_days: 7, transition_days: 90, cleanup_minutes: 60 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    /// libsql database file. Without one everything is kept in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub max_connections: usize,
}

impl Default for Database {
    fn default() -> Self {
        Self { path: None, max_connections: 8 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

/// Resources, channels and rules provisioned at startup
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Seeds {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostSeed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckSeed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<NotificationChannel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<NotificationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSeed {
    pub name: String,
    /// Plain agent key. Only its hash is stored.
    pub api_key: String,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub down_threshold_seconds: Option<u64>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl HostSeed {
    pub fn to_resource(&self) -> MonitoredResource {
        let mut host = MonitoredResource::host(&self.name, hash_api_key(&self.api_key)).with_tags(self.tags.clone());
        if let Some(customer_id) = self.customer_id {
            host = host.with_customer(customer_id);
        }
        if let Some(severity) = self.severity {
            host = host.with_severity(severity);
        }
        if let Some(interval) = self.interval_seconds {
            host.interval_seconds = interval;
        }
        if let Some(spec) = host.host_spec_mut() {
            spec.down_threshold_seconds = self.down_threshold_seconds;
        }
        host
    }
}

fn default_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSeed {
    pub name: String,
    #[serde(flatten)]
    pub spec: CheckSpec,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CheckSeed {
    pub fn to_resource(&self) -> MonitoredResource {
        let mut check = MonitoredResource::check(&self.name, self.spec.clone(), self.interval_seconds)
            .with_failure_threshold(self.failure_threshold)
            .with_tags(self.tags.clone());
        if let Some(customer_id) = self.customer_id {
            check = check.with_customer(customer_id);
        }
        if let Some(severity) = self.severity {
            check = check.with_severity(severity);
        }
        check
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let optional = |value: Option<String>| value.unwrap_or_else(|| "none".into());

        writeln!(f, "Current Internal Configuration State:")?;

        write_title_1(f, "Engine")?;
        write_1(f, "Tick (ms)", &self.engine.tick_ms)?;
        write_1(f, "Max Concurrent Probes", &self.engine.max_concurrent_probes)?;
        write_1(f, "Jitter (ms)", &self.engine.jitter_ms)?;
        write_1(f, "Reload (s)", &self.engine.reload_seconds)?;
        write_1(f, "Shutdown Grace (s)", &self.engine.shutdown_grace_seconds)?;
        write_1(f, "Outbox Sweep (s)", &self.engine.outbox_sweep_seconds)?;
        write_1(f, "Public Targets Only", &self.engine.public_targets_only)?;

        write_title_1(f, "Heartbeat")?;
        write_1(f, "Down Threshold (s)", &self.heartbeat.down_threshold_seconds)?;
        write_1(f, "Sweep (s)", &self.heartbeat.sweep_seconds)?;

        write_title_1(f, "Maintenance")?;
        write_1(f, "Sweep (s)", &self.maintenance.sweep_seconds)?;

        write_title_1(f, "Incidents")?;
        write_1(f, "Response SLA (min)", &self.incidents.response_sla_minutes)?;
        write_1(f, "Resolution SLA (min)", &self.incidents.resolution_sla_minutes)?;
        write_1(f, "Auto Resolve", &format!("{:?}", self.incidents.auto_resolve))?;
        write_1(f, "SLA Sweep (s)", &self.incidents.sla_sweep_seconds)?;

        write_title_1(f, "Notifications")?;
        write_1(f, "Max Attempts", &self.notifications.max_attempts)?;
        write_1(f, "Backoff Base (s)", &self.notifications.backoff_base_seconds)?;
        write_1(f, "Backoff Max (s)", &self.notifications.backoff_max_seconds)?;
        write_1(f, "Delivery Timeout (s)", &self.notifications.delivery_timeout_seconds)?;
        write_1(f, "Retry Sweep (s)", &self.notifications.retry_sweep_seconds)?;
        write_1(f, "Escalation Sweep (s)", &self.notifications.escalation_sweep_seconds)?;
        write_1(f, "Queue Capacity", &self.notifications.queue_capacity)?;
        write_1(
            f,
            "Always Notify Severity",
            &optional(self.notifications.always_notify_severity.map(|severity| severity.to_string())),
        )?;

        write_title_1(f, "Realtime")?;
        write_1(f, "Connection Buffer", &self.realtime.connection_buffer)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Probe Results (days)", &self.retention.probe_result_days)?;
        write_1(f, "Transitions (days)", &self.retention.transition_days)?;
        write_1(f, "Cleanup (min)", &self.retention.cleanup_minutes)?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", &optional(self.database.path.clone()))?;
        write_1(f, "Max Connections", &self.database.max_connections)?;

        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        write_title_1(f, "Seeds")?;
        write_1(f, "Hosts", &self.seeds.hosts.len())?;
        write_1(f, "Checks", &self.seeds.checks.len())?;
        write_1(f, "Channels", &self.seeds.channels.len())?;
        write_1(f, "Rules", &self.seeds.rules.len())?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// # use std::path;
    /// let cfg = vigil_service::config::Config::from_config(None::<&path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(|err| Error::ReadFailed(err.to_string()))?;
            Self::parse(&raw_string)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        toml::from_str(raw).map_err(|err| Error::ParseFailed(err.to_string()))
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::WriteFailed(err.to_string()))?;
        }

        fs::write(path, config_str).map_err(|err| Error::WriteFailed(err.to_string()))
    }

    /// Component settings derived from this file
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scheduler: SchedulerConfig {
                tick: Duration::from_millis(self.engine.tick_ms.max(10)),
                max_concurrent_probes: self.engine.max_concurrent_probes.max(1),
                jitter: Duration::from_millis(self.engine.jitter_ms),
                reload_interval: Duration::from_secs(self.engine.reload_seconds.max(1)),
                shutdown_grace: Duration::from_secs(self.engine.shutdown_grace_seconds),
            },
            tracker: TrackerConfig {
                down_threshold: chrono::Duration::seconds(
                    self.heartbeat.down_threshold_seconds.clamp(MIN_DOWN_THRESHOLD, MAX_DOWN_THRESHOLD) as i64,
                ),
            },
            incidents: IncidentConfig {
                response_sla: chrono::Duration::minutes(self.incidents.response_sla_minutes.clamp(1, MAX_SLA_MINUTES)),
                resolution_sla: chrono::Duration::minutes(
                    self.incidents.resolution_sla_minutes.clamp(1, MAX_SLA_MINUTES),
                ),
                auto_resolve: self.incidents.auto_resolve,
            },
            router: RouterConfig { always_notify_severity: self.notifications.always_notify_severity },
            delivery: DeliveryConfig {
                max_attempts: self.notifications.max_attempts.max(1),
                backoff_base: Duration::from_secs(self.notifications.backoff_base_seconds),
                backoff_max: Duration::from_secs(self.notifications.backoff_max_seconds),
                attempt_timeout: Duration::from_secs(self.notifications.delivery_timeout_seconds.max(1)),
                retry_interval: Duration::from_secs(self.notifications.retry_sweep_seconds.max(1)),
            },
            sweeps: SweepIntervals {
                heartbeat: Duration::from_secs(self.heartbeat.sweep_seconds),
                maintenance: Duration::from_secs(self.maintenance.sweep_seconds),
                sla: Duration::from_secs(self.incidents.sla_sweep_seconds),
                escalation: Duration::from_secs(self.notifications.escalation_sweep_seconds),
                outbox: Duration::from_secs(self.engine.outbox_sweep_seconds),
            },
            retention: RetentionPolicy {
                probe_result_days: self.retention.probe_result_days.max(1),
                transition_days: self.retention.transition_days.max(1),
                cleanup_interval: Duration::from_secs(self.retention.cleanup_minutes.max(1) * 60),
            },
            validation: ValidationPolicy { public_only: self.engine.public_targets_only },
            delivery_queue_capacity: self.notifications.queue_capacity.max(1),
            realtime_buffer: self.realtime.connection_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;
    use crate::monitoring::CheckType;

    #[test]
    fn test_defaults_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil");

        let written = Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("vigil.toml").exists());

        let read = Config::from_config(Some(&path)).unwrap();
        assert_eq!(read.heartbeat.down_threshold_seconds, written.heartbeat.down_threshold_seconds);
        assert_eq!(read.notifications.always_notify_severity, Some(Severity::Critical));
        assert!(read.database.path.is_none());
    }

    #[test]
    fn test_partial_file_and_seeds() {
        let config = Config::parse(
            r#"
            [heartbeat]
            down_threshold_seconds = 120

            [incidents]
            auto_resolve = "always"

            [[seeds.hosts]]
            name = "web-01"
            api_key = "secret"
            down_threshold_seconds = 300

            [[seeds.checks]]
            name = "api"
            check_type = "http"
            target = "https://example.com/health"
            failure_threshold = 3
            severity = "critical"

            [seeds.checks.http]
            expected_status = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat.down_threshold_seconds, 120);
        assert_eq!(config.heartbeat.sweep_seconds, 30);
        assert_eq!(config.incidents.auto_resolve, AutoResolvePolicy::Always);

        let host = config.seeds.hosts[0].to_resource();
        assert_eq!(host.kind(), ResourceKind::Host);
        assert_eq!(host.host_spec().unwrap().api_key_hash, hash_api_key("secret"));
        assert_eq!(host.host_spec().unwrap().down_threshold_seconds, Some(300));

        let check = config.seeds.checks[0].to_resource();
        assert_eq!(check.failure_threshold, 3);
        assert_eq!(check.severity, Severity::Critical);
        assert_eq!(check.interval_seconds, 60);
        let spec = check.check_spec().unwrap();
        assert_eq!(spec.check_type, CheckType::Http);
        assert_eq!(spec.http.expected_status, Some(200));
    }

    #[test]
    fn test_invalid_file_is_a_parse_error() {
        assert!(matches!(Config::parse("[heartbeat]\ndown_threshold_seconds = \"soon\""), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_engine_config_mapping() {
        let mut config = Config::default();
        config.engine.public_targets_only = true;
        config.notifications.always_notify_severity = None;

        let engine = config.engine_config();
        assert_eq!(engine.tracker.down_threshold, chrono::Duration::seconds(90));
        assert_eq!(engine.incidents.response_sla, chrono::Duration::minutes(15));
        assert!(engine.validation.public_only);
        assert!(engine.router.always_notify_severity.is_none());
        assert_eq!(engine.sweeps.heartbeat, Duration::from_secs(30));
        assert_eq!(engine.sweeps.outbox, Duration::from_secs(30));
    }
}
