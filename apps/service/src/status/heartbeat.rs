use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::tracker::StatusTracker;
use crate::database::Repository;
use crate::error::HeartbeatError;
use crate::models::{AgentCommand, HeartbeatAck, HeartbeatRequest};

/// Hex encoded SHA-256 of an agent API key. Only the hash is stored.
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Authenticates agent heartbeats and hands them to the tracker
pub struct HeartbeatService {
    repository: Arc<dyn Repository>,
    tracker: Arc<StatusTracker>,
}

impl HeartbeatService {
    pub fn new(repository: Arc<dyn Repository>, tracker: Arc<StatusTracker>) -> Self {
        Self { repository, tracker }
    }

    /// Accept a heartbeat and answer with any queued agent commands
    pub async fn ingest(
        &self,
        api_key: &str,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatAck, HeartbeatError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(HeartbeatError::Unauthorized);
        }

        let Some(host) = self.repository.host_by_api_key(&hash_api_key(api_key)).await? else {
            warn!("Rejected heartbeat with unknown API key");
            return Err(HeartbeatError::Unauthorized);
        };
        if !host.monitoring_enabled {
            return Err(HeartbeatError::Inactive(host.id));
        }

        let outcome = self.tracker.record_heartbeat(host.id, request, now).await?;
        if outcome.discovered_services > 0 {
            debug!("Heartbeat from {} registered {} new services", host.name, outcome.discovered_services);
        }

        let commands = self.repository.drain_commands(host.id).await?;

        Ok(HeartbeatAck {
            success: true,
            host_id: host.id.to_string(),
            next_check_in: host.interval_seconds,
            commands,
            message: None,
        })
    }

    /// Queue a command for delivery with the host's next acknowledgement
    pub async fn queue_command(
        &self,
        host_id: Uuid,
        command_type: impl Into<String>,
        payload: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<AgentCommand> {
        let command = AgentCommand { command_type: command_type.into(), payload, issued_at: now };
        self.repository.queue_command(host_id, &command).await?;
        Ok(command)
    }
}
