//! Automatic retention and cleanup of monitoring history.
//!
//! This module manages data lifecycle:
//! - Probe results: Cleaned up after 7 days
//! - Processed status transitions: Cleaned up after 90 days
//!
//! Unprocessed outbox rows are never removed. Cleanup runs periodically
//! (every hour by default) as a background task.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::database::Repository;

/// Retention policy for monitoring history
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep probe results
    pub probe_result_days: i64,
    /// Days to keep processed transitions
    pub transition_days: i64,
    pub cleanup_interval: std::time::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { probe_result_days: 7, transition_days: 90, cleanup_interval: std::time::Duration::from_secs(3600) }
    }
}

/// Rows removed by one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub probe_results: u64,
    pub transitions: u64,
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    repository: Arc<dyn Repository>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(repository: Arc<dyn Repository>, policy: RetentionPolicy) -> Self {
        Self { repository, policy }
    }

    /// Delete everything older than the policy allows, relative to `now`
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let probe_cutoff = now - Duration::days(self.policy.probe_result_days);
        let transition_cutoff = now - Duration::days(self.policy.transition_days);

        debug!(
            "Cleaning up probe results before {} and transitions before {}",
            probe_cutoff, transition_cutoff
        );

        let report = CleanupReport {
            probe_results: self.repository.prune_probe_results(probe_cutoff).await?,
            transitions: self.repository.prune_transitions(transition_cutoff).await?,
        };

        if report != CleanupReport::default() {
            info!(
                "Retention cleanup completed: {} probe results, {} transitions deleted",
                report.probe_results, report.transitions
            );
        }
        Ok(report)
    }

    /// Start background cleanup task
    pub fn start_periodic_cleanup(self: Arc<Self>, tasks: &TaskTracker, shutdown: CancellationToken) {
        tasks.spawn(async move {
            let mut interval = tokio::time::interval(self.policy.cleanup_interval.max(std::time::Duration::from_secs(60)));

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.cleanup_expired(Utc::now()).await {
                            warn!("Periodic retention cleanup failed: {}", e);
                        }
                    }
                }
            }
        });
    }
}
