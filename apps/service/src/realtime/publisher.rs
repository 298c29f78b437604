//! Group based fan-out to live connections.
//!
//! Delivery is best effort: each connection has a bounded buffer, a full
//! buffer drops the event for that connection, and a closed one is removed.
//! Nothing is replayed; clients re-join their groups after reconnecting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

use super::events::RealtimeEvent;
use crate::models::ResourceRef;

pub type ConnectionId = Uuid;

pub const DASHBOARD_GROUP: &str = "dashboard";

pub fn host_group(host_id: Uuid) -> String {
    format!("host_{}", host_id)
}

pub fn customer_group(customer_id: Uuid) -> String {
    format!("customer_{}", customer_id)
}

/// `dashboard`, `host_{uuid}` or `customer_{uuid}`
pub fn is_valid_group(name: &str) -> bool {
    if name == DASHBOARD_GROUP {
        return true;
    }
    name.strip_prefix("host_")
        .or_else(|| name.strip_prefix("customer_"))
        .is_some_and(|id| Uuid::parse_str(id).is_ok())
}

/// Groups interested in events about `resource`
pub fn groups_for(resource: &ResourceRef) -> Vec<String> {
    let mut groups = vec![DASHBOARD_GROUP.to_string()];
    if let Some(host_id) = resource.host_id {
        groups.push(host_group(host_id));
    }
    if let Some(customer_id) = resource.customer_id {
        groups.push(customer_group(customer_id));
    }
    groups
}

struct Connection {
    sender: mpsc::Sender<Arc<RealtimeEvent>>,
    groups: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove(&mut self, id: &ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        for group in connection.groups {
            if let Some(members) = self.groups.get_mut(&group) {
                members.remove(id);
                if members.is_empty() {
                    self.groups.remove(&group);
                }
            }
        }
    }
}

pub struct RealtimePublisher {
    registry: RwLock<Registry>,
    buffer: usize,
}

impl RealtimePublisher {
    pub fn new(buffer: usize) -> Self {
        Self { registry: RwLock::new(Registry::default()), buffer: buffer.max(1) }
    }

    /// Register a connection. It receives nothing until it joins a group.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<RealtimeEvent>>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.registry.write().await.connections.insert(id, Connection { sender, groups: HashSet::new() });
        debug!("Realtime connection {} opened", id);
        (id, receiver)
    }

    /// Returns false for unknown connections
    pub async fn join(&self, id: ConnectionId, group: &str) -> bool {
        let mut registry = self.registry.write().await;
        let Some(connection) = registry.connections.get_mut(&id) else {
            return false;
        };
        connection.groups.insert(group.to_string());
        registry.groups.entry(group.to_string()).or_default().insert(id);
        true
    }

    pub async fn leave(&self, id: ConnectionId, group: &str) {
        let mut registry = self.registry.write().await;
        if let Some(connection) = registry.connections.get_mut(&id) {
            connection.groups.remove(group);
        }
        if let Some(members) = registry.groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                registry.groups.remove(group);
            }
        }
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.registry.write().await.remove(&id);
        debug!("Realtime connection {} closed", id);
    }

    /// Send `event` once to every connection in any of `groups`. Returns the
    /// number of connections that accepted it.
    pub async fn publish(&self, groups: &[String], event: RealtimeEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let registry = self.registry.read().await;
            let targets: HashSet<&ConnectionId> =
                groups.iter().filter_map(|group| registry.groups.get(group)).flatten().collect();

            for id in targets {
                let Some(connection) = registry.connections.get(id) else {
                    continue;
                };
                match connection.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => debug!("Realtime connection {} is lagging, dropped {}", id, event.name()),
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.write().await;
            for id in &closed {
                registry.remove(id);
            }
            info!("Removed {} closed realtime connection(s)", closed.len());
        }

        delivered
    }

    /// Publish to the groups interested in `resource`
    pub async fn publish_for(&self, resource: &ResourceRef, event: RealtimeEvent) -> usize {
        self.publish(&groups_for(resource), event).await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn group_size(&self, group: &str) -> usize {
        self.registry.read().await.groups.get(group).map_or(0, HashSet::len)
    }
}
