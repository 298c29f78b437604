use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AgentCommand, DispatchStatus, Incident, MonitoredResource, NotificationChannel, NotificationDispatch,
    NotificationRule, ResourceKind, StatusTransition,
};
use crate::monitoring::types::ProbeResult;

/// Probe results kept per resource by the in-memory repository
const MEMORY_RESULT_HISTORY: usize = 1000;

/// Storage collaborator of the engine
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_resource(&self, resource: &MonitoredResource) -> Result<()>;

    async fn get_resource(&self, id: Uuid) -> Result<Option<MonitoredResource>>;

    async fn list_resources(&self) -> Result<Vec<MonitoredResource>>;

    async fn resources_of_kind(&self, kind: ResourceKind) -> Result<Vec<MonitoredResource>>;

    async fn delete_resource(&self, id: Uuid) -> Result<()>;

    /// Checks with monitoring enabled
    async fn enabled_checks(&self) -> Result<Vec<MonitoredResource>>;

    async fn host_by_api_key(&self, api_key_hash: &str) -> Result<Option<MonitoredResource>>;

    async fn services_of_host(&self, host_id: Uuid) -> Result<Vec<MonitoredResource>>;

    /// Persist the resource, the probe result and the transition outbox row
    /// as one atomic step
    async fn commit_status(
        &self,
        resource: &MonitoredResource,
        transition: Option<&StatusTransition>,
        probe: Option<&ProbeResult>,
    ) -> Result<()>;

    /// Outbox rows not yet marked processed, oldest first
    async fn pending_transitions(&self) -> Result<Vec<StatusTransition>>;

    async fn mark_transition_processed(&self, id: Uuid) -> Result<()>;

    /// Delete probe results older than `before`. Returns the number deleted.
    async fn prune_probe_results(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Delete processed transitions older than `before`. Pending outbox rows are kept.
    async fn prune_transitions(&self, before: DateTime<Utc>) -> Result<u64>;

    /// All transitions recorded for a resource, oldest first
    async fn transition_history(&self, resource_id: Uuid) -> Result<Vec<StatusTransition>>;

    /// Newest first
    async fn recent_probe_results(&self, resource_id: Uuid, limit: usize) -> Result<Vec<ProbeResult>>;

    async fn save_incident(&self, incident: &Incident) -> Result<()>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>>;

    async fn open_incidents(&self) -> Result<Vec<Incident>>;

    async fn open_incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>>;

    async fn incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>>;

    /// Monotonic incident serial, starting at 1
    async fn next_incident_number(&self) -> Result<u64>;

    async fn save_rule(&self, rule: &NotificationRule) -> Result<()>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<NotificationRule>>;

    async fn list_rules(&self) -> Result<Vec<NotificationRule>>;

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()>;

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>>;

    async fn save_dispatch(&self, dispatch: &NotificationDispatch) -> Result<()>;

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<NotificationDispatch>>;

    /// Oldest first
    async fn list_dispatches(&self) -> Result<Vec<NotificationDispatch>>;

    async fn pending_dispatches(&self) -> Result<Vec<NotificationDispatch>>;

    /// Dispatches created for the given status transition
    async fn dispatches_for_source(&self, source_id: Uuid) -> Result<Vec<NotificationDispatch>>;

    async fn queue_command(&self, host_id: Uuid, command: &AgentCommand) -> Result<()>;

    /// Remove and return queued commands, oldest first
    async fn drain_commands(&self, host_id: Uuid) -> Result<Vec<AgentCommand>>;
}

#[derive(Default)]
struct MemoryState {
    resources: HashMap<Uuid, MonitoredResource>,
    probe_results: HashMap<Uuid, VecDeque<ProbeResult>>,
    transitions: Vec<StatusTransition>,
    outbox: Vec<Uuid>,
    incidents: HashMap<Uuid, Incident>,
    incident_counter: u64,
    rules: HashMap<Uuid, NotificationRule>,
    channels: HashMap<Uuid, NotificationChannel>,
    dispatches: HashMap<Uuid, NotificationDispatch>,
    commands: HashMap<Uuid, Vec<AgentCommand>>,
}

/// Process-local repository for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_incidents(mut incidents: Vec<Incident>) -> Vec<Incident> {
    incidents.sort_by_key(|incident| incident.number);
    incidents
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_resource(&self, resource: &MonitoredResource) -> Result<()> {
        self.state.write().await.resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<MonitoredResource>> {
        Ok(self.state.read().await.resources.get(&id).cloned())
    }

    async fn list_resources(&self) -> Result<Vec<MonitoredResource>> {
        let mut resources: Vec<_> = self.state.read().await.resources.values().cloned().collect();
        resources.sort_by_key(|resource| resource.created_at);
        Ok(resources)
    }

    async fn resources_of_kind(&self, kind: ResourceKind) -> Result<Vec<MonitoredResource>> {
        Ok(self.list_resources().await?.into_iter().filter(|resource| resource.kind() == kind).collect())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.resources.remove(&id);
        state.probe_results.remove(&id);
        Ok(())
    }

    async fn enabled_checks(&self) -> Result<Vec<MonitoredResource>> {
        Ok(self
            .resources_of_kind(ResourceKind::Check)
            .await?
            .into_iter()
            .filter(|resource| resource.monitoring_enabled)
            .collect())
    }

    async fn host_by_api_key(&self, api_key_hash: &str) -> Result<Option<MonitoredResource>> {
        let state = self.state.read().await;
        Ok(state
            .resources
            .values()
            .find(|resource| resource.host_spec().is_some_and(|spec| spec.api_key_hash == api_key_hash))
            .cloned())
    }

    async fn services_of_host(&self, host_id: Uuid) -> Result<Vec<MonitoredResource>> {
        Ok(self
            .resources_of_kind(ResourceKind::Service)
            .await?
            .into_iter()
            .filter(|resource| resource.host_id == Some(host_id))
            .collect())
    }

    async fn commit_status(
        &self,
        resource: &MonitoredResource,
        transition: Option<&StatusTransition>,
        probe: Option<&ProbeResult>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.resources.insert(resource.id, resource.clone());

        if let Some(probe) = probe {
            let history = state.probe_results.entry(resource.id).or_default();
            history.push_front(probe.clone());
            history.truncate(MEMORY_RESULT_HISTORY);
        }

        if let Some(transition) = transition {
            state.transitions.push(transition.clone());
            state.outbox.push(transition.id);
        }
        Ok(())
    }

    async fn pending_transitions(&self) -> Result<Vec<StatusTransition>> {
        let state = self.state.read().await;
        Ok(state
            .transitions
            .iter()
            .filter(|transition| state.outbox.contains(&transition.id))
            .cloned()
            .collect())
    }

    async fn mark_transition_processed(&self, id: Uuid) -> Result<()> {
        self.state.write().await.outbox.retain(|pending| *pending != id);
        Ok(())
    }

    async fn prune_probe_results(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut pruned = 0;
        for history in state.probe_results.values_mut() {
            let kept = history.len();
            history.retain(|result| result.timestamp >= before);
            pruned += (kept - history.len()) as u64;
        }
        Ok(pruned)
    }

    async fn prune_transitions(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let MemoryState { transitions, outbox, .. } = &mut *state;
        let kept = transitions.len();
        transitions.retain(|transition| transition.at >= before || outbox.contains(&transition.id));
        Ok((kept - transitions.len()) as u64)
    }

    async fn transition_history(&self, resource_id: Uuid) -> Result<Vec<StatusTransition>> {
        let state = self.state.read().await;
        Ok(state.transitions.iter().filter(|transition| transition.resource.id == resource_id).cloned().collect())
    }

    async fn recent_probe_results(&self, resource_id: Uuid, limit: usize) -> Result<Vec<ProbeResult>> {
        let state = self.state.read().await;
        Ok(state
            .probe_results
            .get(&resource_id)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        self.state.write().await.incidents.insert(incident.id, incident.clone());
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.state.read().await.incidents.get(&id).cloned())
    }

    async fn open_incidents(&self) -> Result<Vec<Incident>> {
        let state = self.state.read().await;
        Ok(sorted_incidents(state.incidents.values().filter(|incident| incident.is_open()).cloned().collect()))
    }

    async fn open_incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>> {
        Ok(self.open_incidents().await?.into_iter().filter(|incident| incident.resource.id == resource_id).collect())
    }

    async fn incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>> {
        let state = self.state.read().await;
        Ok(sorted_incidents(
            state.incidents.values().filter(|incident| incident.resource.id == resource_id).cloned().collect(),
        ))
    }

    async fn next_incident_number(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        state.incident_counter += 1;
        Ok(state.incident_counter)
    }

    async fn save_rule(&self, rule: &NotificationRule) -> Result<()> {
        self.state.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<NotificationRule>> {
        Ok(self.state.read().await.rules.get(&id).cloned())
    }

    async fn list_rules(&self) -> Result<Vec<NotificationRule>> {
        Ok(self.state.read().await.rules.values().cloned().collect())
    }

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        self.state.write().await.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.state.read().await.channels.get(&id).cloned())
    }

    async fn save_dispatch(&self, dispatch: &NotificationDispatch) -> Result<()> {
        self.state.write().await.dispatches.insert(dispatch.id, dispatch.clone());
        Ok(())
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<NotificationDispatch>> {
        Ok(self.state.read().await.dispatches.get(&id).cloned())
    }

    async fn list_dispatches(&self) -> Result<Vec<NotificationDispatch>> {
        let mut dispatches: Vec<_> = self.state.read().await.dispatches.values().cloned().collect();
        dispatches.sort_by_key(|dispatch| dispatch.created_at);
        Ok(dispatches)
    }

    async fn pending_dispatches(&self) -> Result<Vec<NotificationDispatch>> {
        Ok(self
            .list_dispatches()
            .await?
            .into_iter()
            .filter(|dispatch| dispatch.status == DispatchStatus::Pending)
            .collect())
    }

    async fn dispatches_for_source(&self, source_id: Uuid) -> Result<Vec<NotificationDispatch>> {
        Ok(self
            .list_dispatches()
            .await?
            .into_iter()
            .filter(|dispatch| dispatch.source_id == Some(source_id))
            .collect())
    }

    async fn queue_command(&self, host_id: Uuid, command: &AgentCommand) -> Result<()> {
        self.state.write().await.commands.entry(host_id).or_default().push(command.clone());
        Ok(())
    }

    async fn drain_commands(&self, host_id: Uuid) -> Result<Vec<AgentCommand>> {
        Ok(self.state.write().await.commands.remove(&host_id).unwrap_or_default())
    }
}
