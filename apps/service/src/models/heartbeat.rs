use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot pushed by a host agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent_version: Option<String>,
    pub system: SystemSnapshot,
    #[serde(default)]
    pub disks: Vec<DiskSnapshot>,
    #[serde(default)]
    pub services: Vec<ServiceReport>,
    #[serde(default)]
    pub network: Option<NetworkSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub os_type: String,
    pub os_version: Option<String>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
    pub uptime_seconds: u64,
    pub process_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSnapshot {
    pub name: String,
    pub mount_point: Option<String>,
    pub total_gb: f64,
    pub used_gb: f64,
    pub used_percent: f64,
}

/// A service as seen by the agent (systemd unit, Windows service, container…)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub service_type: String,
    /// Raw agent status: Running, Stopped, Failed, Starting…
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSnapshot {
    pub primary_ip: Option<String>,
    pub public_ip: Option<String>,
    pub in_bytes: Option<u64>,
    pub out_bytes: Option<u64>,
}

/// Latest metrics kept on the host for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub reported_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
    pub uptime_seconds: u64,
    pub process_count: u32,
    pub disks: Vec<DiskSnapshot>,
    pub network: Option<NetworkSnapshot>,
}

impl From<&HeartbeatRequest> for HostMetrics {
    fn from(request: &HeartbeatRequest) -> Self {
        Self {
            reported_at: request.timestamp,
            cpu_percent: request.system.cpu_percent,
            ram_percent: request.system.ram_percent,
            ram_used_mb: request.system.ram_used_mb,
            ram_total_mb: request.system.ram_total_mb,
            uptime_seconds: request.system.uptime_seconds,
            process_count: request.system.process_count,
            disks: request.disks.clone(),
            network: request.network.clone(),
        }
    }
}

/// Command queued by an operator for delivery with the next acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command_type: String,
    pub payload: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Response to an accepted heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub success: bool,
    pub host_id: String,
    /// Seconds until the next expected heartbeat
    pub next_check_in: u64,
    pub commands: Vec<AgentCommand>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_payload_deserializes() {
        let payload = r#"{
            "timestamp": "2026-01-10T12:00:00Z",
            "agent_version": "1.4.2",
            "system": { "hostname": "web-01", "os_type": "Linux", "cpu_percent": 12.5, "ram_percent": 40.0 },
            "disks": [{ "name": "/dev/sda1", "used_percent": 71.0 }],
            "services": [{ "name": "nginx.service", "type": "SystemdUnit", "status": "Running" }]
        }"#;

        let request: HeartbeatRequest = serde_json::from_str(payload).unwrap();
        assert_eq!(request.system.hostname, "web-01");
        assert_eq!(request.services[0].service_type, "SystemdUnit");
        assert!(request.network.is_none());

        let metrics = HostMetrics::from(&request);
        assert_eq!(metrics.disks.len(), 1);
        assert_eq!(metrics.cpu_percent, 12.5);
    }
}
