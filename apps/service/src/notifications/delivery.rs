//! Dispatch delivery with bounded retries.
//!
//! A dispatch is saved as `Pending` before any attempt, so a crash between
//! routing and delivery only delays it. Failed attempts are rescheduled with
//! exponential backoff until `max_attempts`, after which the dispatch is
//! marked `Failed`. An adapter success is recorded as `Sent`; `Delivered` is
//! reserved for provider receipts.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::channels::{ChannelRegistry, DeliveryOutcome, OutboundMessage};
use crate::database::Repository;
use crate::models::{DispatchStatus, NotificationDispatch};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound for one adapter call
    pub attempt_timeout: Duration,
    /// How often due retries are picked up
    pub retry_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(15 * 60),
            attempt_timeout: Duration::from_secs(15),
            retry_interval: Duration::from_secs(10),
        }
    }
}

impl DeliveryConfig {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Handle used by the router to request immediate delivery
#[derive(Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<Uuid>,
}

impl DeliveryQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Ask for delivery now. A full queue leaves the dispatch to the retry sweep.
    pub fn enqueue(&self, dispatch_id: Uuid) {
        if let Err(e) = self.sender.try_send(dispatch_id) {
            warn!("Delivery queue unavailable for dispatch {}, leaving it pending: {}", dispatch_id, e);
        }
    }
}

pub struct DeliveryWorker {
    repository: Arc<dyn Repository>,
    channels: ChannelRegistry,
    config: DeliveryConfig,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Removes a dispatch from the in-flight set when the attempt ends
struct Claim<'a> {
    worker: &'a DeliveryWorker,
    id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.worker.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

impl DeliveryWorker {
    pub fn new(repository: Arc<dyn Repository>, channels: ChannelRegistry, config: DeliveryConfig) -> Self {
        Self { repository, channels, config, in_flight: Mutex::new(HashSet::new()) }
    }

    fn claim(&self, id: Uuid) -> Option<Claim<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(id).then_some(Claim { worker: self, id })
    }

    /// Make one delivery attempt. Returns the dispatch as stored afterwards,
    /// or `None` if another attempt is already running.
    pub async fn deliver(&self, dispatch_id: Uuid, now: DateTime<Utc>) -> Result<Option<NotificationDispatch>> {
        let Some(_claim) = self.claim(dispatch_id) else {
            debug!("Dispatch {} is already being delivered", dispatch_id);
            return Ok(None);
        };

        let mut dispatch = self
            .repository
            .get_dispatch(dispatch_id)
            .await?
            .ok_or_else(|| anyhow!("Dispatch {} not found", dispatch_id))?;
        if dispatch.status != DispatchStatus::Pending {
            return Ok(Some(dispatch));
        }

        match self.attempt(&dispatch).await {
            Ok(external_id) => {
                dispatch.status = DispatchStatus::Sent;
                dispatch.sent_at = Some(now);
                dispatch.external_id = external_id;
                dispatch.next_retry_at = None;
                dispatch.error_message = None;
                info!("Sent {} notification {} via channel {}", dispatch.event_type, dispatch.id, dispatch.channel_id);
            }
            Err(Failure::Permanent(reason)) => {
                warn!("Notification {} cannot be delivered: {}", dispatch.id, reason);
                self.fail(&mut dispatch, reason, now);
            }
            Err(Failure::Retryable(reason)) => {
                dispatch.retry_count += 1;
                if dispatch.retry_count >= self.config.max_attempts {
                    error!("Notification {} failed after {} attempts: {}", dispatch.id, dispatch.retry_count, reason);
                    self.fail(&mut dispatch, reason, now);
                } else {
                    let delay = self.config.backoff(dispatch.retry_count);
                    dispatch.next_retry_at = Some(now + chrono::Duration::seconds(delay.as_secs() as i64));
                    warn!(
                        "Notification {} attempt {} failed, retrying at {:?}: {}",
                        dispatch.id, dispatch.retry_count, dispatch.next_retry_at, reason
                    );
                    dispatch.error_message = Some(reason);
                }
            }
        }

        self.repository.save_dispatch(&dispatch).await?;
        Ok(Some(dispatch))
    }

    fn fail(&self, dispatch: &mut NotificationDispatch, reason: String, now: DateTime<Utc>) {
        dispatch.status = DispatchStatus::Failed;
        dispatch.failed_at = Some(now);
        dispatch.next_retry_at = None;
        dispatch.error_message = Some(reason);
    }

    async fn attempt(&self, dispatch: &NotificationDispatch) -> Result<Option<String>, Failure> {
        let channel = match self.repository.get_channel(dispatch.channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => return Err(Failure::Permanent(format!("Channel {} not found", dispatch.channel_id))),
            Err(e) => return Err(Failure::Retryable(format!("Failed to load channel: {:#}", e))),
        };
        if !channel.enabled {
            return Err(Failure::Permanent(format!("Channel '{}' is disabled", channel.name)));
        }
        let Some(adapter) = self.channels.get(channel.kind) else {
            return Err(Failure::Permanent(format!("No adapter for {} channels", channel.kind)));
        };

        let message = OutboundMessage {
            recipient: dispatch.recipient.clone(),
            subject: dispatch.subject.clone(),
            body: dispatch.body.clone(),
            metadata: metadata(dispatch),
        };

        match tokio::time::timeout(self.config.attempt_timeout, adapter.send(&channel, &message)).await {
            Ok(DeliveryOutcome::Delivered { external_id }) => Ok(external_id),
            Ok(DeliveryOutcome::Failed(reason)) => Err(Failure::Retryable(reason)),
            Err(_) => Err(Failure::Retryable(format!(
                "Delivery timed out after {}s",
                self.config.attempt_timeout.as_secs()
            ))),
        }
    }

    /// Record a provider receipt for a sent dispatch
    pub async fn mark_delivered(
        &self,
        dispatch_id: Uuid,
        external_id: Option<String>,
    ) -> Result<NotificationDispatch> {
        let mut dispatch = self
            .repository
            .get_dispatch(dispatch_id)
            .await?
            .ok_or_else(|| anyhow!("Dispatch {} not found", dispatch_id))?;

        if dispatch.status == DispatchStatus::Sent {
            dispatch.status = DispatchStatus::Delivered;
            if external_id.is_some() {
                dispatch.external_id = external_id;
            }
            self.repository.save_dispatch(&dispatch).await?;
        }
        Ok(dispatch)
    }

    /// Pending dispatches whose retry time has come, including ones never attempted
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .repository
            .pending_dispatches()
            .await?
            .into_iter()
            .filter(|dispatch| dispatch.next_retry_at.is_none_or(|at| at <= now))
            .map(|dispatch| dispatch.id)
            .collect())
    }

    /// Deliver queued dispatches and due retries until shutdown, then wait for
    /// running attempts.
    pub async fn run(self: Arc<Self>, mut queue: mpsc::Receiver<Uuid>, shutdown: CancellationToken) {
        let tracker = TaskTracker::new();
        let mut retry_tick = tokio::time::interval(self.config.retry_interval);

        info!("Notification delivery worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = queue.recv() => {
                    let Some(id) = received else { break };
                    self.spawn_attempt(&tracker, id);
                }
                _ = retry_tick.tick() => {
                    match self.due(Utc::now()).await {
                        Ok(ids) => {
                            for id in ids {
                                self.spawn_attempt(&tracker, id);
                            }
                        }
                        Err(e) => error!("Failed to load pending notifications: {:#}", e),
                    }
                }
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("Notification delivery worker stopped");
    }

    fn spawn_attempt(self: &Arc<Self>, tracker: &TaskTracker, id: Uuid) {
        let worker = self.clone();
        tracker.spawn(async move {
            if let Err(e) = worker.deliver(id, Utc::now()).await {
                error!("Delivery of notification {} failed: {:#}", id, e);
            }
        });
    }
}

enum Failure {
    /// Retrying cannot help (missing channel, no adapter)
    Permanent(String),
    Retryable(String),
}

fn metadata(dispatch: &NotificationDispatch) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::from([
        ("dispatch_id".to_string(), dispatch.id.to_string()),
        ("event_type".to_string(), dispatch.event_type.to_string()),
        ("resource_id".to_string(), dispatch.resource_id.to_string()),
        ("attempt".to_string(), (dispatch.retry_count + 1).to_string()),
    ]);
    if let Some(incident_id) = dispatch.incident_id {
        metadata.insert("incident_id".to_string(), incident_id.to_string());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryRepository;
    use crate::models::{ChannelKind, NotificationChannel, NotificationEventType};
    use crate::notifications::channels::ChannelAdapter;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then delivers
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for Flaky {
        async fn send(&self, _channel: &NotificationChannel, _message: &OutboundMessage) -> DeliveryOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                DeliveryOutcome::Failed("connection refused".into())
            } else {
                DeliveryOutcome::Delivered { external_id: Some(format!("msg-{}", call)) }
            }
        }
    }

    async fn setup(failures: u32) -> (Arc<MemoryRepository>, DeliveryWorker, NotificationDispatch) {
        let repository = Arc::new(MemoryRepository::new());
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name: "hook".into(),
            kind: ChannelKind::Webhook,
            enabled: true,
            config: serde_json::Value::Null,
        };
        repository.save_channel(&channel).await.unwrap();

        let dispatch = NotificationDispatch {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            channel_id: channel.id,
            event_type: NotificationEventType::HostDown,
            resource_id: Uuid::new_v4(),
            incident_id: None,
            source_id: None,
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

        let mut channels = ChannelRegistry::empty();
        channels.register(ChannelKind::Webhook, Arc::new(Flaky { failures, calls: AtomicU32::new(0) }));
        let worker = DeliveryWorker::new(repository.clone(), channels, DeliveryConfig::default());
        (repository, worker, dispatch)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = DeliveryConfig::default();

        assert_eq!(config.backoff(1), Duration::from_secs(30));
        assert_eq!(config.backoff(2), Duration::from_secs(60));
        assert_eq!(config.backoff(3), Duration::from_secs(120));
        assert_eq!(config.backoff(20), config.backoff_max);
    }

    #[tokio::test]
    async fn test_retry_then_sent() {
        let (_, worker, dispatch) = setup(1).await;
        let now = Utc::now();

        let first = worker.deliver(dispatch.id, now).await.unwrap().unwrap();
        assert_eq!(first.status, DispatchStatus::Pending);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.next_retry_at, Some(now + chrono::Duration::seconds(30)));

        // Not due before the backoff elapses
        assert!(worker.due(now).await.unwrap().is_empty());
        assert_eq!(worker.due(now + chrono::Duration::seconds(30)).await.unwrap(), vec![dispatch.id]);

        let second = worker.deliver(dispatch.id, now).await.unwrap().unwrap();
        assert_eq!(second.status, DispatchStatus::Sent);
        assert_eq!(second.external_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let (_, worker, dispatch) = setup(u32::MAX).await;
        let now = Utc::now();

        for _ in 0..3 {
            worker.deliver(dispatch.id, now).await.unwrap();
        }

        let stored = worker.deliver(dispatch.id, now).await.unwrap().unwrap();
        assert_eq!(stored.status, DispatchStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_missing_channel_fails_without_retry() {
        let (repository, worker, mut dispatch) = setup(0).await;
        dispatch.channel_id = Uuid::new_v4();
        repository.save_dispatch(&dispatch).await.unwrap();

        let stored = worker.deliver(dispatch.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(stored.status, DispatchStatus::Failed);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_receipt_marks_delivered() {
        let (_, worker, dispatch) = setup(0).await;

        worker.deliver(dispatch.id, Utc::now()).await.unwrap();
        let stored = worker.mark_delivered(dispatch.id, None).await.unwrap();

        assert_eq!(stored.status, DispatchStatus::Delivered);
        assert_eq!(stored.external_id.as_deref(), Some("msg-0"));
    }
}
