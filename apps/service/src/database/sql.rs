use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Value, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::repository::Repository;
use crate::models::{
    AgentCommand, DispatchStatus, Incident, MonitoredResource, NotificationChannel, NotificationDispatch,
    NotificationRule, ResourceKind, StatusTransition,
};
use crate::monitoring::types::ProbeResult;
use crate::pool::{LibsqlManager, LibsqlPool};

/// libsql repository. Entities are stored as JSON documents next to the
/// columns queries filter on.
pub struct LibsqlRepository {
    pool: LibsqlPool,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize document")
}

fn from_json<T: DeserializeOwned>(document: &str) -> Result<T> {
    serde_json::from_str(document).context("Failed to deserialize document")
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn optional_id(id: Option<Uuid>) -> Value {
    match id {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}

fn kind_name(kind: ResourceKind) -> String {
    kind.to_string()
}

fn dispatch_status_name(status: DispatchStatus) -> &'static str {
    match status {
        DispatchStatus::Pending => "pending",
        DispatchStatus::Sent => "sent",
        DispatchStatus::Delivered => "delivered",
        DispatchStatus::Failed => "failed",
    }
}

/// Read the first column of every row as a JSON document
async fn documents<T: DeserializeOwned>(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<T>> {
    let mut rows = conn.query(sql, params).await?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next().await? {
        let document: String = row.get(0)?;
        documents.push(from_json(&document)?);
    }
    Ok(documents)
}

async fn document<T: DeserializeOwned>(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Option<T>> {
    Ok(documents(conn, sql, params).await?.into_iter().next())
}

impl LibsqlRepository {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {}", e))
    }

    async fn write_resource(conn: &Connection, resource: &MonitoredResource) -> Result<()> {
        let api_key_hash = match resource.host_spec() {
            Some(spec) => Value::Text(spec.api_key_hash.clone()),
            None => Value::Null,
        };
        conn.execute(
            "INSERT INTO resources (id, kind, host_id, api_key_hash, enabled, created_at, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                host_id = excluded.host_id,
                api_key_hash = excluded.api_key_hash,
                enabled = excluded.enabled,
                document = excluded.document",
            vec![
                Value::Text(resource.id.to_string()),
                Value::Text(kind_name(resource.kind())),
                optional_id(resource.host_id),
                api_key_hash,
                Value::Integer(resource.monitoring_enabled as i64),
                Value::Integer(millis(resource.created_at)),
                Value::Text(to_json(resource)?),
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for LibsqlRepository {
    async fn save_resource(&self, resource: &MonitoredResource) -> Result<()> {
        let conn = self.get_conn().await?;
        Self::write_resource(&conn, resource).await
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<MonitoredResource>> {
        let conn = self.get_conn().await?;
        document(&conn, "SELECT document FROM resources WHERE id = ?1", vec![Value::Text(id.to_string())]).await
    }

    async fn list_resources(&self) -> Result<Vec<MonitoredResource>> {
        let conn = self.get_conn().await?;
        documents(&conn, "SELECT document FROM resources ORDER BY created_at", Vec::new()).await
    }

    async fn resources_of_kind(&self, kind: ResourceKind) -> Result<Vec<MonitoredResource>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM resources WHERE kind = ?1 ORDER BY created_at",
            vec![Value::Text(kind_name(kind))],
        )
        .await
    }

    async fn delete_resource(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM probe_results WHERE resource_id = ?1", params![id.to_string()]).await?;
        conn.execute("DELETE FROM resources WHERE id = ?1", params![id.to_string()]).await?;
        Ok(())
    }

    async fn enabled_checks(&self) -> Result<Vec<MonitoredResource>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM resources WHERE kind = ?1 AND enabled = 1 ORDER BY created_at",
            vec![Value::Text(kind_name(ResourceKind::Check))],
        )
        .await
    }

    async fn host_by_api_key(&self, api_key_hash: &str) -> Result<Option<MonitoredResource>> {
        let conn = self.get_conn().await?;
        document(
            &conn,
            "SELECT document FROM resources WHERE api_key_hash = ?1",
            vec![Value::Text(api_key_hash.to_string())],
        )
        .await
    }

    async fn services_of_host(&self, host_id: Uuid) -> Result<Vec<MonitoredResource>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM resources WHERE kind = ?1 AND host_id = ?2 ORDER BY created_at",
            vec![Value::Text(kind_name(ResourceKind::Service)), Value::Text(host_id.to_string())],
        )
        .await
    }

    async fn commit_status(
        &self,
        resource: &MonitoredResource,
        transition: Option<&StatusTransition>,
        probe: Option<&ProbeResult>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        Self::write_resource(&tx, resource).await?;

        if let Some(probe) = probe {
            tx.execute(
                "INSERT INTO probe_results (resource_id, timestamp, success, document) VALUES (?1, ?2, ?3, ?4)",
                params![
                    probe.resource_id.to_string(),
                    millis(probe.timestamp),
                    probe.success as i64,
                    to_json(probe)?
                ],
            )
            .await?;
        }

        if let Some(transition) = transition {
            tx.execute(
                "INSERT INTO status_transitions (id, resource_id, at, processed, document) VALUES (?1, ?2, ?3, 0, ?4)",
                params![
                    transition.id.to_string(),
                    transition.resource.id.to_string(),
                    millis(transition.at),
                    to_json(transition)?
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn pending_transitions(&self) -> Result<Vec<StatusTransition>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM status_transitions WHERE processed = 0 ORDER BY at, rowid",
            Vec::new(),
        )
        .await
    }

    async fn mark_transition_processed(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("UPDATE status_transitions SET processed = 1 WHERE id = ?1", params![id.to_string()]).await?;
        Ok(())
    }

    async fn prune_probe_results(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn.execute("DELETE FROM probe_results WHERE timestamp < ?1", params![millis(before)]).await?)
    }

    async fn prune_transitions(&self, before: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        Ok(conn
            .execute("DELETE FROM status_transitions WHERE processed = 1 AND at < ?1", params![millis(before)])
            .await?)
    }

    async fn transition_history(&self, resource_id: Uuid) -> Result<Vec<StatusTransition>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM status_transitions WHERE resource_id = ?1 ORDER BY at, rowid",
            vec![Value::Text(resource_id.to_string())],
        )
        .await
    }

    async fn recent_probe_results(&self, resource_id: Uuid, limit: usize) -> Result<Vec<ProbeResult>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM probe_results WHERE resource_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            vec![Value::Text(resource_id.to_string()), Value::Integer(limit as i64)],
        )
        .await
    }

    async fn save_incident(&self, incident: &Incident) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO incidents (id, number, resource_id, status, open, document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                open = excluded.open,
                document = excluded.document",
            params![
                incident.id.to_string(),
                incident.number as i64,
                incident.resource.id.to_string(),
                incident.status.to_string(),
                incident.is_open() as i64,
                to_json(incident)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        let conn = self.get_conn().await?;
        document(&conn, "SELECT document FROM incidents WHERE id = ?1", vec![Value::Text(id.to_string())]).await
    }

    async fn open_incidents(&self) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        documents(&conn, "SELECT document FROM incidents WHERE open = 1 ORDER BY number", Vec::new()).await
    }

    async fn open_incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM incidents WHERE open = 1 AND resource_id = ?1 ORDER BY number",
            vec![Value::Text(resource_id.to_string())],
        )
        .await
    }

    async fn incidents_for(&self, resource_id: Uuid) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM incidents WHERE resource_id = ?1 ORDER BY number",
            vec![Value::Text(resource_id.to_string())],
        )
        .await
    }

    async fn next_incident_number(&self) -> Result<u64> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("UPDATE counters SET value = value + 1 WHERE name = 'incident_number' RETURNING value", ())
            .await?;
        let row = rows.next().await?.ok_or_else(|| anyhow!("Incident counter is missing"))?;
        Ok(row.get::<i64>(0)? as u64)
    }

    async fn save_rule(&self, rule: &NotificationRule) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_rules (id, document) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            params![rule.id.to_string(), to_json(rule)?],
        )
        .await?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<NotificationRule>> {
        let conn = self.get_conn().await?;
        document(&conn, "SELECT document FROM notification_rules WHERE id = ?1", vec![Value::Text(id.to_string())])
            .await
    }

    async fn list_rules(&self) -> Result<Vec<NotificationRule>> {
        let conn = self.get_conn().await?;
        documents(&conn, "SELECT document FROM notification_rules", Vec::new()).await
    }

    async fn save_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_channels (id, document) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            params![channel.id.to_string(), to_json(channel)?],
        )
        .await?;
        Ok(())
    }

    async fn get_channel(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        let conn = self.get_conn().await?;
        document(&conn, "SELECT document FROM notification_channels WHERE id = ?1", vec![Value::Text(id.to_string())])
            .await
    }

    async fn save_dispatch(&self, dispatch: &NotificationDispatch) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO notification_dispatches (id, status, created_at, source_id, document)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, document = excluded.document",
            params![
                dispatch.id.to_string(),
                dispatch_status_name(dispatch.status),
                millis(dispatch.created_at),
                optional_id(dispatch.source_id),
                to_json(dispatch)?
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_dispatch(&self, id: Uuid) -> Result<Option<NotificationDispatch>> {
        let conn = self.get_conn().await?;
        document(
            &conn,
            "SELECT document FROM notification_dispatches WHERE id = ?1",
            vec![Value::Text(id.to_string())],
        )
        .await
    }

    async fn list_dispatches(&self) -> Result<Vec<NotificationDispatch>> {
        let conn = self.get_conn().await?;
        documents(&conn, "SELECT document FROM notification_dispatches ORDER BY created_at, rowid", Vec::new()).await
    }

    async fn pending_dispatches(&self) -> Result<Vec<NotificationDispatch>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM notification_dispatches WHERE status = ?1 ORDER BY created_at, rowid",
            vec![Value::Text(dispatch_status_name(DispatchStatus::Pending).to_string())],
        )
        .await
    }

    async fn dispatches_for_source(&self, source_id: Uuid) -> Result<Vec<NotificationDispatch>> {
        let conn = self.get_conn().await?;
        documents(
            &conn,
            "SELECT document FROM notification_dispatches WHERE source_id = ?1 ORDER BY created_at, rowid",
            vec![Value::Text(source_id.to_string())],
        )
        .await
    }

    async fn queue_command(&self, host_id: Uuid, command: &AgentCommand) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO agent_commands (host_id, issued_at, document) VALUES (?1, ?2, ?3)",
            params![host_id.to_string(), millis(command.issued_at), to_json(command)?],
        )
        .await?;
        Ok(())
    }

    async fn drain_commands(&self, host_id: Uuid) -> Result<Vec<AgentCommand>> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let commands = documents(
            &tx,
            "SELECT document FROM agent_commands WHERE host_id = ?1 ORDER BY id",
            vec![Value::Text(host_id.to_string())],
        )
        .await?;
        tx.execute("DELETE FROM agent_commands WHERE host_id = ?1", params![host_id.to_string()]).await?;
        tx.commit().await?;
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_local_pool;
    use crate::models::{NotificationEventType, Severity, Status, TransitionCause};
    use crate::monitoring::types::{CheckSpec, CheckType};
    use tempfile::tempdir;

    async fn repository() -> (LibsqlRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        let pool = open_local_pool(&path.to_string_lossy(), 4).await.unwrap();
        (LibsqlRepository::new_from_pool(pool), dir)
    }

    #[tokio::test]
    async fn test_resource_documents_roundtrip() {
        let (repository, _dir) = repository().await;
        let host = MonitoredResource::host("web-01", "abc123");
        let check = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 60)
            .with_severity(Severity::Medium);
        repository.save_resource(&host).await.unwrap();
        repository.save_resource(&check).await.unwrap();

        assert_eq!(repository.get_resource(check.id).await.unwrap(), Some(check.clone()));
        assert_eq!(repository.host_by_api_key("abc123").await.unwrap().map(|h| h.id), Some(host.id));
        assert_eq!(repository.enabled_checks().await.unwrap().len(), 1);
        assert_eq!(repository.resources_of_kind(ResourceKind::Host).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_status_and_outbox() {
        let (repository, _dir) = repository().await;
        let mut check = MonitoredResource::check("api", CheckSpec::new(CheckType::Tcp, "example.com:443"), 60);
        let now = Utc::now();
        let probe = ProbeResult::new(check.id, "example.com:443".into(), now).success(12, None);
        let transition = check.transition_to(Status::Up, TransitionCause::ProbeSuccess, None, now).unwrap();

        repository.commit_status(&check, Some(&transition), Some(&probe)).await.unwrap();

        assert_eq!(repository.get_resource(check.id).await.unwrap().unwrap().status, Status::Up);
        assert_eq!(repository.recent_probe_results(check.id, 10).await.unwrap(), vec![probe]);
        assert_eq!(repository.pending_transitions().await.unwrap(), vec![transition.clone()]);

        repository.mark_transition_processed(transition.id).await.unwrap();
        assert!(repository.pending_transitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incident_counter_and_commands() {
        let (repository, _dir) = repository().await;
        assert_eq!(repository.next_incident_number().await.unwrap(), 1);
        assert_eq!(repository.next_incident_number().await.unwrap(), 2);

        let host_id = Uuid::new_v4();
        let command = AgentCommand { command_type: "collect_logs".into(), payload: None, issued_at: Utc::now() };
        repository.queue_command(host_id, &command).await.unwrap();
        assert_eq!(repository.drain_commands(host_id).await.unwrap().len(), 1);
        assert!(repository.drain_commands(host_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatches_found_by_source() {
        let (repository, _dir) = repository().await;
        let source_id = Uuid::new_v4();
        let mut dispatch = NotificationDispatch {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            event_type: NotificationEventType::HostDown,
            resource_id: Uuid::new_v4(),
            incident_id: None,
            source_id: Some(source_id),
            recipient: None,
            subject: "Host DOWN".into(),
            body: "body".into(),
            status: DispatchStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            created_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            error_message: None,
            external_id: None,
        };
        repository.save_dispatch(&dispatch).await.unwrap();
        dispatch.status = DispatchStatus::Sent;
        repository.save_dispatch(&dispatch).await.unwrap();

        assert_eq!(repository.dispatches_for_source(source_id).await.unwrap(), vec![dispatch]);
        assert!(repository.dispatches_for_source(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
