use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use super::checker::CheckerRegistry;
use super::types::{CheckSpec, ProbeErrorKind, ProbeResult};

/// Probe executor - runs a single check and turns every outcome into a result
#[derive(Clone)]
pub struct ProbeExecutor {
    registry: CheckerRegistry,
}

impl ProbeExecutor {
    pub fn new(registry: CheckerRegistry) -> Self {
        Self { registry }
    }

    /// Execute a check under a hard timeout equal to its configured timeout.
    ///
    /// Dropping the checker future on timeout cancels its I/O.
    pub async fn execute(&self, resource_id: Uuid, spec: &CheckSpec) -> ProbeResult {
        let Some(checker) = self.registry.get(spec.check_type) else {
            return ProbeResult::new(resource_id, spec.target.clone(), Utc::now())
                .failure(ProbeErrorKind::Other, format!("No checker registered for {}", spec.check_type));
        };

        let limit = Duration::from_secs(spec.timeout_seconds.max(1));
        let start = Instant::now();
        let outcome = timeout(limit, checker.check(spec)).await;
        let result = ProbeResult::new(resource_id, spec.target.clone(), Utc::now());

        let result = match outcome {
            Err(_) => result
                .failure(ProbeErrorKind::TimedOut, format!("Request timed out after {} seconds", limit.as_secs()))
                .with_latency(Some(start.elapsed().as_millis() as u64)),
            Ok(Ok(outcome)) => {
                let slow = spec.degraded_threshold_ms.is_some_and(|threshold| outcome.latency_ms > threshold);
                let result = if slow {
                    result.degraded(outcome.latency_ms, outcome.status_code)
                } else {
                    result.success(outcome.latency_ms, outcome.status_code)
                };
                result.with_detail(outcome.detail)
            }
            Ok(Err(failure)) => result
                .failure(failure.kind, failure.message)
                .with_latency(failure.latency_ms)
                .with_status_code(failure.status_code)
                .with_detail(failure.detail),
        };

        debug!(
            resource_id = %resource_id,
            target = %result.target,
            success = result.success,
            latency_ms = ?result.latency_ms,
            "Probe finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::{Checker, ProbeFailure, ProbeOutcome};
    use crate::monitoring::types::CheckType;
    use std::sync::Arc;

    struct SlowChecker(Duration);

    #[async_trait::async_trait]
    impl Checker for SlowChecker {
        async fn check(&self, _spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
            tokio::time::sleep(self.0).await;
            Ok(ProbeOutcome::new(self.0.as_millis() as u64))
        }
    }

    fn executor_with(checker: SlowChecker) -> ProbeExecutor {
        let mut registry = CheckerRegistry::empty();
        registry.register(CheckType::Http, Arc::new(checker));
        ProbeExecutor::new(registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_becomes_timed_out() {
        let executor = executor_with(SlowChecker(Duration::from_secs(60)));
        let spec = CheckSpec::new(CheckType::Http, "https://slow.example.com").with_timeout(5);

        let result = executor.execute(Uuid::new_v4(), &spec).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_success_is_degraded() {
        let executor = executor_with(SlowChecker(Duration::from_millis(2500)));
        let mut spec = CheckSpec::new(CheckType::Http, "https://slow.example.com").with_timeout(5);
        spec.degraded_threshold_ms = Some(1000);

        let result = executor.execute(Uuid::new_v4(), &spec).await;

        assert!(result.success);
        assert!(result.degraded);
        assert_eq!(result.latency_ms, Some(2500));
    }

    #[tokio::test]
    async fn test_missing_checker_is_a_failed_result() {
        let executor = ProbeExecutor::new(CheckerRegistry::empty());
        let spec = CheckSpec::new(CheckType::Dns, "example.com");

        let result = executor.execute(Uuid::new_v4(), &spec).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::Other));
    }
}
