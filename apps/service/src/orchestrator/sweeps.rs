//! Periodic sweeps driven by wall-clock time.
//!
//! - Heartbeat: hosts silent past their threshold go Down
//! - Maintenance: expired windows end and true status is re-evaluated
//! - SLA: response/resolution deadlines are flagged once their notification
//!   was routed
//! - Escalation: unacknowledged incidents are escalated after their delay
//! - Outbox: transitions left unprocessed by a failure are processed again
//!
//! Each sweep runs on its own interval. A failed pass is logged and the
//! next tick tries again.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::pipeline::EventPipeline;
use crate::incidents::IncidentManager;
use crate::notifications::NotificationRouter;
use crate::status::StatusTracker;

#[derive(Debug, Clone)]
pub struct SweepIntervals {
    pub heartbeat: Duration,
    pub maintenance: Duration,
    pub sla: Duration,
    pub escalation: Duration,
    pub outbox: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            maintenance: Duration::from_secs(60),
            sla: Duration::from_secs(60),
            escalation: Duration::from_secs(60),
            outbox: Duration::from_secs(30),
        }
    }
}

pub struct Sweeps {
    tracker: Arc<StatusTracker>,
    incidents: Arc<IncidentManager>,
    router: Arc<NotificationRouter>,
    pipeline: Arc<EventPipeline>,
    intervals: SweepIntervals,
}

impl Sweeps {
    pub fn new(
        tracker: Arc<StatusTracker>,
        incidents: Arc<IncidentManager>,
        router: Arc<NotificationRouter>,
        pipeline: Arc<EventPipeline>,
        intervals: SweepIntervals,
    ) -> Self {
        Self { tracker, incidents, router, pipeline, intervals }
    }

    /// Mark silent hosts Down. Transitions flow through the tracker's listener.
    pub async fn heartbeat_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.tracker.sweep_heartbeats(now).await?.len())
    }

    pub async fn maintenance_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.tracker.sweep_maintenance(now).await?.len())
    }

    /// Route each due breach, then flag it. A breach whose routing failed
    /// stays unflagged and is reported again on the next pass.
    pub async fn sla_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut flagged = 0;
        for event in self.incidents.pending_sla_breaches(now).await? {
            self.pipeline.process_incident_events(std::slice::from_ref(&event), now).await?;
            if self.incidents.commit_sla_breach(&event, now).await? {
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    pub async fn escalation_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let events = self.router.sweep_escalations(&self.incidents, now).await?;
        self.pipeline.process_incident_events(&events, now).await?;
        Ok(events.len())
    }

    /// Retry outbox rows older than one outbox interval. Younger rows are
    /// most likely still being processed inline.
    pub async fn outbox_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.intervals.outbox).unwrap_or(chrono::Duration::zero());
        self.pipeline.replay_pending(now - grace).await
    }

    /// Start every sweep loop. They stop when `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, tasks: &TaskTracker, shutdown: &CancellationToken) {
        info!(
            "Starting sweeps (heartbeat {}s, maintenance {}s, sla {}s, escalation {}s, outbox {}s)",
            self.intervals.heartbeat.as_secs(),
            self.intervals.maintenance.as_secs(),
            self.intervals.sla.as_secs(),
            self.intervals.escalation.as_secs(),
            self.intervals.outbox.as_secs()
        );

        let heartbeat = self.clone();
        let maintenance = self.clone();
        let sla = self.clone();
        let escalation = self.clone();
        let outbox = self.clone();

        spawn_sweep(tasks, "heartbeat", self.intervals.heartbeat, shutdown.clone(), move |now| {
            let sweeps = heartbeat.clone();
            async move { sweeps.heartbeat_pass(now).await }
        });
        spawn_sweep(tasks, "maintenance", self.intervals.maintenance, shutdown.clone(), move |now| {
            let sweeps = maintenance.clone();
            async move { sweeps.maintenance_pass(now).await }
        });
        spawn_sweep(tasks, "sla", self.intervals.sla, shutdown.clone(), move |now| {
            let sweeps = sla.clone();
            async move { sweeps.sla_pass(now).await }
        });
        spawn_sweep(tasks, "escalation", self.intervals.escalation, shutdown.clone(), move |now| {
            let sweeps = escalation.clone();
            async move { sweeps.escalation_pass(now).await }
        });
        spawn_sweep(tasks, "outbox", self.intervals.outbox, shutdown.clone(), move |now| {
            let sweeps = outbox.clone();
            async move { sweeps.outbox_pass(now).await }
        });
    }
}

fn spawn_sweep<F, Fut>(tasks: &TaskTracker, name: &'static str, period: Duration, shutdown: CancellationToken, pass: F)
where
    F: Fn(DateTime<Utc>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    tasks.spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => match pass(Utc::now()).await {
                    Ok(0) => {}
                    Ok(changes) => debug!("{} sweep produced {} change(s)", name, changes),
                    Err(e) => warn!("{} sweep failed: {:#}", name, e),
                },
            }
        }

        debug!("{} sweep stopped", name);
    });
}
