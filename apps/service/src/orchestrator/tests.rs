/// End-to-end scenarios for the engine
///
/// These tests drive the whole pipeline through the engine's public surface:
/// - Probe results and heartbeats in
/// - Transitions, incidents and dispatches out
/// - Live events on the real-time publisher
use crate::database::{MemoryRepository, Repository};
use crate::events::{EngineEvent, IncidentEventKind};
use crate::incidents::{IncidentAction, OperatorRequest};
use crate::models::heartbeat::SystemSnapshot;
use crate::models::{
    ChannelKind, DispatchStatus, HeartbeatRequest, IncidentStatus, MaintenanceWindow, MonitoredResource,
    NotificationChannel, NotificationEventType, NotificationRule, Severity, Status,
};
use crate::monitoring::checker::{Checker, ProbeFailure, ProbeOutcome};
use crate::monitoring::{CheckSpec, CheckType, CheckerRegistry, ProbeErrorKind};
use crate::notifications::{ChannelAdapter, ChannelRegistry, DeliveryOutcome, OutboundMessage};
use crate::orchestrator::{Engine, EngineConfig};
use crate::realtime::DASHBOARD_GROUP;
use crate::status::hash_api_key;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Replays scripted probe outcomes, succeeding once the script runs out
#[derive(Default)]
struct ScriptedChecker {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedChecker {
    fn push(&self, outcomes: &[bool]) {
        self.script.lock().unwrap().extend(outcomes.iter().copied());
    }
}

#[async_trait::async_trait]
impl Checker for ScriptedChecker {
    async fn check(&self, _spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
        let healthy = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if healthy {
            Ok(ProbeOutcome::new(25))
        } else {
            Err(ProbeFailure::new(ProbeErrorKind::TimedOut, "Request timed out after 30 seconds"))
        }
    }
}

/// Records every message handed to it
#[derive(Default)]
struct RecordingAdapter {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingAdapter {
    fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|message| message.subject.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for RecordingAdapter {
    async fn send(&self, _channel: &NotificationChannel, message: &OutboundMessage) -> DeliveryOutcome {
        self.sent.lock().unwrap().push(message.clone());
        DeliveryOutcome::Delivered { external_id: Some(format!("msg-{}", self.sent.lock().unwrap().len())) }
    }
}

struct Harness {
    engine: Engine,
    repository: Arc<MemoryRepository>,
    checker: Arc<ScriptedChecker>,
    adapter: Arc<RecordingAdapter>,
    channel: NotificationChannel,
}

impl Harness {
    fn new() -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let checker = Arc::new(ScriptedChecker::default());
        let adapter = Arc::new(RecordingAdapter::default());

        let mut checkers = CheckerRegistry::empty();
        checkers.register(CheckType::Http, checker.clone());
        let mut channels = ChannelRegistry::empty();
        channels.register(ChannelKind::Webhook, adapter.clone());

        let engine = Engine::new(repository.clone(), checkers, channels, EngineConfig::default());
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name: "ops-webhook".into(),
            kind: ChannelKind::Webhook,
            enabled: true,
            config: serde_json::json!({ "url": "http://127.0.0.1:9/hook" }),
        };

        Self { engine, repository, checker, adapter, channel }
    }

    async fn with_rule(&self, rule: NotificationRule) {
        self.engine.save_channel(&self.channel).await.unwrap();
        self.engine.save_rule(&rule).await.unwrap();
    }

    async fn check(&self, severity: Severity, failure_threshold: u32) -> MonitoredResource {
        let spec = CheckSpec::new(CheckType::Http, "https://api.example.com/health");
        let check = MonitoredResource::check("api", spec, 60)
            .with_severity(severity)
            .with_failure_threshold(failure_threshold);
        self.engine.provision(check).await.unwrap()
    }

    async fn host(&self, api_key: &str) -> MonitoredResource {
        self.engine.provision(MonitoredResource::host("web-01", hash_api_key(api_key))).await.unwrap()
    }

    async fn probe(&self, check: &MonitoredResource, outcomes: &[bool]) {
        self.checker.push(outcomes);
        for _ in outcomes {
            self.engine.probe_now(check.id).await.unwrap();
        }
    }

    async fn status(&self, id: Uuid) -> Status {
        self.repository.get_resource(id).await.unwrap().unwrap().status
    }

    async fn dispatches_of(&self, event_type: NotificationEventType) -> usize {
        let dispatches = self.repository.list_dispatches().await.unwrap();
        dispatches.iter().filter(|dispatch| dispatch.event_type == event_type).count()
    }
}

fn heartbeat(at: DateTime<Utc>) -> HeartbeatRequest {
    HeartbeatRequest {
        timestamp: at,
        agent_version: Some("1.4.2".into()),
        system: SystemSnapshot { hostname: "web-01".into(), cpu_percent: 12.0, ..SystemSnapshot::default() },
        disks: Vec::new(),
        services: Vec::new(),
        network: None,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0).unwrap()
}

#[tokio::test]
async fn test_three_timeouts_open_one_incident_and_notify() {
    let harness = Harness::new();
    let rule = NotificationRule::new("check failures", vec![NotificationEventType::CheckFailed], harness.channel.id);
    harness.with_rule(rule).await;
    let check = harness.check(Severity::Critical, 3).await;

    harness.probe(&check, &[true]).await;
    assert_eq!(harness.status(check.id).await, Status::Up);

    harness.probe(&check, &[false, false]).await;
    assert_eq!(harness.status(check.id).await, Status::Up);
    assert_eq!(harness.dispatches_of(NotificationEventType::CheckFailed).await, 0);

    harness.probe(&check, &[false]).await;
    assert_eq!(harness.status(check.id).await, Status::Down);

    let history = harness.repository.transition_history(check.id).await.unwrap();
    let downs: Vec<_> = history.iter().filter(|t| t.current == Status::Down).collect();
    assert_eq!(downs.len(), 1);
    assert_eq!(downs[0].previous, Status::Up);

    let open = harness.engine.open_incidents().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].resource.id, check.id);

    assert_eq!(harness.dispatches_of(NotificationEventType::CheckFailed).await, 1);
    let sent = harness.engine.deliver_due(Utc::now()).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, DispatchStatus::Sent);
    assert_eq!(harness.adapter.subjects().len(), 1);

    // Every transition was processed
    assert!(harness.repository.pending_transitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_identical_outcomes_emit_no_new_transitions() {
    let harness = Harness::new();
    let check = harness.check(Severity::High, 1).await;

    harness.probe(&check, &[true, true, true]).await;
    harness.probe(&check, &[false, false, false]).await;

    let history = harness.repository.transition_history(check.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|t| (t.previous, t.current)).collect();
    assert_eq!(statuses, vec![(Status::Unknown, Status::Up), (Status::Up, Status::Down)]);
    assert_eq!(harness.engine.open_incidents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_silent_host_goes_down_and_recovers_on_heartbeat() {
    let harness = Harness::new();
    let rule = NotificationRule::new("host down", vec![NotificationEventType::HostDown], harness.channel.id);
    harness.with_rule(rule).await;
    let host = harness.host("agent-key").await;
    let start = t0();

    harness.engine.ingest_heartbeat("agent-key", &heartbeat(start), start).await.unwrap();
    assert_eq!(harness.status(host.id).await, Status::Up);

    let sweeps = harness.engine.sweeps();
    assert_eq!(sweeps.heartbeat_pass(start + Duration::seconds(89)).await.unwrap(), 0);
    assert_eq!(sweeps.heartbeat_pass(start + Duration::seconds(100)).await.unwrap(), 1);
    assert_eq!(harness.status(host.id).await, Status::Down);
    assert_eq!(harness.dispatches_of(NotificationEventType::HostDown).await, 1);

    let open = harness.engine.open_incidents().await.unwrap();
    assert_eq!(open.len(), 1);
    let incident_id = open[0].id;

    let at = start + Duration::seconds(150);
    harness.engine.ingest_heartbeat("agent-key", &heartbeat(at), at).await.unwrap();
    assert_eq!(harness.status(host.id).await, Status::Up);

    let incident = harness.engine.incident(incident_id).await.unwrap();
    assert_eq!(incident.status, IncidentStatus::Resolved);
    assert!(harness.engine.open_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cooldown_allows_one_dispatch_per_window() {
    let harness = Harness::new();
    let mut rule = NotificationRule::new("host down", vec![NotificationEventType::HostDown], harness.channel.id);
    rule.cooldown_minutes = Some(30);
    harness.with_rule(rule).await;
    harness.host("agent-key").await;
    let sweeps = harness.engine.sweeps();
    let start = t0();

    // Down at ~T+100s, back at T+5m, down again at ~T+6m40s
    harness.engine.ingest_heartbeat("agent-key", &heartbeat(start), start).await.unwrap();
    sweeps.heartbeat_pass(start + Duration::seconds(100)).await.unwrap();
    let back = start + Duration::minutes(5);
    harness.engine.ingest_heartbeat("agent-key", &heartbeat(back), back).await.unwrap();
    sweeps.heartbeat_pass(back + Duration::seconds(100)).await.unwrap();

    let history = harness.repository.list_dispatches().await.unwrap();
    assert_eq!(harness.dispatches_of(NotificationEventType::HostDown).await, 1, "{:?}", history);
}

#[tokio::test]
async fn test_maintenance_pre_empts_down_until_it_ends() {
    let harness = Harness::new();
    let check = harness.check(Severity::High, 1).await;
    harness.probe(&check, &[true]).await;

    let window = MaintenanceWindow {
        starts_at: Utc::now() - Duration::minutes(1),
        ends_at: None,
        reason: Some("Database upgrade".into()),
    };
    harness.engine.start_maintenance(check.id, window).await.unwrap();
    assert_eq!(harness.status(check.id).await, Status::Maintenance);

    harness.probe(&check, &[false, false, false]).await;
    assert_eq!(harness.status(check.id).await, Status::Maintenance);
    assert!(harness.engine.open_incidents().await.unwrap().is_empty());

    let transitions = harness.engine.end_maintenance(check.id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].current, Status::Down);
    assert_eq!(harness.engine.open_incidents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_acknowledged_incident_dedups_repeat_failures() {
    let harness = Harness::new();
    let check = harness.check(Severity::High, 1).await;
    harness.probe(&check, &[true, false]).await;

    let incident = harness.engine.open_incidents().await.unwrap().remove(0);
    let acked = harness
        .engine
        .incident_action(incident.id, OperatorRequest::new(IncidentAction::Acknowledge, "alice"))
        .await
        .unwrap();
    assert_eq!(acked.status, IncidentStatus::Acknowledged);

    // Recovery leaves an owned incident open, the next failure is an occurrence
    harness.probe(&check, &[true, false]).await;

    let open = harness.engine.open_incidents().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, incident.id);
    assert_eq!(open[0].occurrence_count, 2);
    assert_eq!(open[0].status, IncidentStatus::Acknowledged);
}

#[tokio::test]
async fn test_live_events_reach_dashboard_subscribers() {
    let harness = Harness::new();
    let check = harness.check(Severity::High, 1).await;
    let publisher = harness.engine.publisher();
    let (connection, mut live) = publisher.connect().await;
    publisher.join(connection, DASHBOARD_GROUP).await;
    let mut engine_events = harness.engine.subscribe();

    harness.probe(&check, &[false]).await;

    let mut names = Vec::new();
    while let Ok(event) = live.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"CheckResult"));
    assert!(names.contains(&"IncidentCreated"));

    let mut created = false;
    while let Ok(event) = engine_events.try_recv() {
        if let EngineEvent::Incident(event) = event {
            created |= event.kind == IncidentEventKind::Created;
        }
    }
    assert!(created);
}

#[tokio::test]
async fn test_escalation_fires_after_delay_without_acknowledgement() {
    let harness = Harness::new();
    let mut rule = NotificationRule::new("host down", vec![NotificationEventType::HostDown], harness.channel.id);
    rule.escalate_after_minutes = Some(15);
    harness.with_rule(rule).await;
    harness.host("agent-key").await;
    let sweeps = harness.engine.sweeps();
    let start = t0();

    harness.engine.ingest_heartbeat("agent-key", &heartbeat(start), start).await.unwrap();
    let down_at = start + Duration::seconds(100);
    sweeps.heartbeat_pass(down_at).await.unwrap();
    assert_eq!(harness.engine.pending_escalations(), 1);

    assert_eq!(sweeps.escalation_pass(down_at + Duration::minutes(10)).await.unwrap(), 0);
    assert_eq!(sweeps.escalation_pass(down_at + Duration::minutes(16)).await.unwrap(), 1);

    let open = harness.engine.open_incidents().await.unwrap();
    assert_eq!(open[0].escalation_level, 1);
    assert_eq!(harness.engine.pending_escalations(), 0);
}

#[tokio::test]
async fn test_unprocessed_transitions_are_replayed_on_start() {
    let harness = Harness::new();
    let mut check = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://api.example.com"), 60);
    check.status = Status::Up;
    let transition = check
        .transition_to(Status::Down, crate::models::TransitionCause::ProbeFailure, None, Utc::now())
        .unwrap();
    harness.repository.commit_status(&check, Some(&transition), None).await.unwrap();
    // Keep the check down if the scheduler probes it before the assertions
    harness.checker.push(&[false; 8]);

    harness.engine.start().await.unwrap();
    assert!(harness.engine.start().await.is_err());

    assert_eq!(harness.engine.open_incidents().await.unwrap().len(), 1);
    assert!(harness.repository.pending_transitions().await.unwrap().is_empty());

    harness.engine.shutdown(std::time::Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_transition_replayed_after_crash_notifies_once() {
    let harness = Harness::new();
    let events = vec![NotificationEventType::CheckFailed, NotificationEventType::IncidentCreated];
    harness.with_rule(NotificationRule::new("check failures", events, harness.channel.id)).await;
    let mut check = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://api.example.com"), 60);
    check.status = Status::Up;
    let at = t0();
    let transition = check
        .transition_to(Status::Down, crate::models::TransitionCause::ProbeFailure, None, at)
        .unwrap();
    harness.repository.commit_status(&check, Some(&transition), None).await.unwrap();
    let sweeps = harness.engine.sweeps();

    // Too fresh for the outbox sweep
    assert_eq!(sweeps.outbox_pass(at).await.unwrap(), 0);
    assert_eq!(sweeps.outbox_pass(at + Duration::minutes(1)).await.unwrap(), 1);

    // A crash before the row was marked processed leaves it pending again
    harness.repository.commit_status(&check, Some(&transition), None).await.unwrap();
    sweeps.outbox_pass(at + Duration::minutes(2)).await.unwrap();

    let open = harness.engine.open_incidents().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].occurrence_count, 1);
    assert_eq!(harness.dispatches_of(NotificationEventType::CheckFailed).await, 1);
    assert_eq!(harness.dispatches_of(NotificationEventType::IncidentCreated).await, 1);
    assert!(harness.repository.pending_transitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sla_breach_is_notified_then_flagged() {
    let harness = Harness::new();
    let rule = NotificationRule::new("sla", vec![NotificationEventType::SlaResponseBreached], harness.channel.id);
    harness.with_rule(rule).await;
    let check = harness.check(Severity::High, 1).await;
    harness.probe(&check, &[false]).await;
    let sweeps = harness.engine.sweeps();
    let late = Utc::now() + Duration::minutes(16);

    assert_eq!(sweeps.sla_pass(late).await.unwrap(), 1);
    assert_eq!(sweeps.sla_pass(late).await.unwrap(), 0);
    assert_eq!(harness.dispatches_of(NotificationEventType::SlaResponseBreached).await, 1);

    let open = harness.engine.open_incidents().await.unwrap();
    assert!(open[0].sla_response_breached);
}

#[tokio::test]
async fn test_unknown_heartbeat_key_is_rejected() {
    let harness = Harness::new();
    harness.host("agent-key").await;

    let result = harness.engine.ingest_heartbeat("wrong-key", &heartbeat(t0()), t0()).await;
    assert!(matches!(result, Err(crate::error::HeartbeatError::Unauthorized)));
}
