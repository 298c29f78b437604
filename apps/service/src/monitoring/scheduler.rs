use anyhow::Result;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::ProbeExecutor;
use super::types::{CheckSpec, ProbeResult};
use crate::database::Repository;
use crate::locks::KeyedMutex;
use crate::models::MonitoredResource;

/// Per-check claims held for the duration of a probe. Scheduled probes skip
/// a held claim; on-demand probes wait for it.
pub type ProbeClaims = KeyedMutex<Uuid>;

/// A check as the scheduler sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCheck {
    pub id: Uuid,
    pub spec: CheckSpec,
    pub interval: Duration,
}

impl ScheduledCheck {
    /// `None` for hosts, services and disabled checks
    pub fn from_resource(resource: &MonitoredResource) -> Option<Self> {
        if !resource.monitoring_enabled {
            return None;
        }
        let spec = resource.check_spec()?.clone();
        Some(Self { id: resource.id, spec, interval: Duration::from_secs(resource.interval_seconds.max(1)) })
    }
}

#[derive(Debug)]
struct Entry {
    check: ScheduledCheck,
    generation: u64,
    in_flight: bool,
    /// Removed while in flight. Dropped once its probe completes.
    retired: bool,
}

/// Due-time ordered set of checks.
///
/// A check is either waiting in the heap or in flight, never both, which is
/// what makes dispatch single-flight per check. A check removed while in
/// flight stays as a retired entry until `complete`, so re-adding it cannot
/// start a second probe. Heap items whose generation no longer matches their
/// entry are stale and skipped.
#[derive(Debug)]
pub struct ScheduleQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Uuid)>>,
    entries: HashMap<Uuid, Entry>,
    next_generation: u64,
    jitter: Duration,
}

impl ScheduleQueue {
    pub fn new(jitter: Duration) -> Self {
        Self { heap: BinaryHeap::new(), entries: HashMap::new(), next_generation: 0, jitter }
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn push(&mut self, id: Uuid, due: Instant) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.heap.push(Reverse((due, generation, id)));
        generation
    }

    /// Add a check (first run due at `now` plus jitter) or update an existing one in place
    pub fn upsert(&mut self, check: ScheduledCheck, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&check.id) {
            entry.check = check;
            entry.retired = false;
            return;
        }

        let id = check.id;
        let due = now + self.jitter();
        let generation = self.push(id, due);
        self.entries.insert(id, Entry { check, generation, in_flight: false, retired: false });
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.in_flight => {
                let was_live = !entry.retired;
                entry.retired = true;
                was_live
            }
            Some(_) => self.entries.remove(&id).is_some(),
            None => false,
        }
    }

    fn is_live(&self, id: &Uuid) -> bool {
        self.entries.get(id).is_some_and(|entry| !entry.retired)
    }

    /// Replace the schedule with `checks`, keeping due times of known checks.
    /// Returns how many checks were added and removed.
    pub fn sync(&mut self, checks: Vec<ScheduledCheck>, now: Instant) -> (usize, usize) {
        let wanted: HashSet<Uuid> = checks.iter().map(|check| check.id).collect();
        let stale: Vec<Uuid> =
            self.entries.keys().filter(|id| !wanted.contains(id) && self.is_live(id)).copied().collect();
        for id in &stale {
            self.remove(*id);
        }

        let mut added = 0;
        for check in checks {
            if !self.is_live(&check.id) {
                added += 1;
            }
            self.upsert(check, now);
        }
        (added, stale.len())
    }

    /// Take up to `limit` checks that are due at `now`, marking them in flight
    pub fn pop_due(&mut self, now: Instant, limit: usize) -> Vec<ScheduledCheck> {
        let mut due = Vec::new();

        while due.len() < limit {
            let Some(Reverse((at, generation, id))) = self.heap.peek().copied() else {
                break;
            };
            if at > now {
                break;
            }
            self.heap.pop();

            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if entry.generation != generation || entry.in_flight || entry.retired {
                continue;
            }
            entry.in_flight = true;
            due.push(entry.check.clone());
        }

        due
    }

    /// Reschedule a check from its completion time
    pub fn complete(&mut self, id: Uuid, completed_at: Instant) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if entry.retired {
            self.entries.remove(&id);
            return;
        }
        let interval = entry.check.interval;
        let due = completed_at + interval + self.jitter();
        let generation = self.push(id, due);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.generation = generation;
            entry.in_flight = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.retired).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Includes retired checks whose probe is still running
    pub fn in_flight(&self) -> usize {
        self.entries.values().filter(|entry| entry.in_flight).count()
    }
}

/// Receives every probe result before its check is rescheduled
#[async_trait::async_trait]
pub trait ProbeResultSink: Send + Sync {
    async fn handle(&self, result: ProbeResult);
}

#[async_trait::async_trait]
impl ProbeResultSink for mpsc::Sender<ProbeResult> {
    async fn handle(&self, result: ProbeResult) {
        if let Err(e) = self.send(result).await {
            error!("Failed to send check result: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub max_concurrent_probes: usize,
    pub jitter: Duration,
    pub reload_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_concurrent_probes: 64,
            jitter: Duration::from_millis(500),
            reload_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Monitoring scheduler - dispatches due checks with bounded concurrency
pub struct MonitoringScheduler {
    executor: ProbeExecutor,
    repository: Arc<dyn Repository>,
    sink: Arc<dyn ProbeResultSink>,
    claims: Arc<ProbeClaims>,
    config: SchedulerConfig,
}

impl MonitoringScheduler {
    pub fn new(
        executor: ProbeExecutor,
        repository: Arc<dyn Repository>,
        sink: Arc<dyn ProbeResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self { executor, repository, sink, claims: Arc::new(ProbeClaims::new()), config }
    }

    /// Share probe claims with on-demand probing
    pub fn with_claims(mut self, claims: Arc<ProbeClaims>) -> Self {
        self.claims = claims;
        self
    }

    async fn reload(&self, queue: &mut ScheduleQueue) -> Result<()> {
        let checks: Vec<ScheduledCheck> =
            self.repository.enabled_checks().await?.iter().filter_map(ScheduledCheck::from_resource).collect();
        let (added, removed) = queue.sync(checks, Instant::now());
        if added > 0 || removed > 0 {
            info!("Schedule reloaded: {} added, {} removed, {} total", added, removed, queue.len());
        }
        Ok(())
    }

    fn dispatch_due(&self, queue: &mut ScheduleQueue, probes: &mut JoinSet<Uuid>, running: &mut HashMap<TaskId, Uuid>) {
        let capacity = self.config.max_concurrent_probes.saturating_sub(probes.len());
        if capacity == 0 {
            debug!("Probe concurrency limit reached ({} in flight)", probes.len());
            return;
        }

        for check in queue.pop_due(Instant::now(), capacity) {
            let executor = self.executor.clone();
            let sink = self.sink.clone();
            let claims = self.claims.clone();
            let id = check.id;
            let handle = probes.spawn(async move {
                let Some(_claim) = claims.try_lock(&check.id) else {
                    debug!("Check {} is already being probed, skipping", check.id);
                    return check.id;
                };
                let result = executor.execute(check.id, &check.spec).await;
                sink.handle(result).await;
                check.id
            });
            running.insert(handle.id(), id);
        }
    }

    /// Run until `shutdown` is cancelled, then give in-flight probes the grace
    /// period before aborting them
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut queue = ScheduleQueue::new(self.config.jitter);
        let mut probes: JoinSet<Uuid> = JoinSet::new();
        let mut running: HashMap<TaskId, Uuid> = HashMap::new();

        if let Err(e) = self.reload(&mut queue).await {
            error!("Failed to load checks: {}", e);
        }
        info!("Scheduler started with {} checks", queue.len());

        let mut tick = interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reload = interval(self.config.reload_interval);
        reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reload.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = tick.tick() => self.dispatch_due(&mut queue, &mut probes, &mut running),

                _ = reload.tick() => {
                    if let Err(e) = self.reload(&mut queue).await {
                        warn!("Failed to reload checks, keeping current schedule: {}", e);
                    }
                }

                Some(joined) = probes.join_next_with_id(), if !probes.is_empty() => {
                    let task_id = match &joined {
                        Ok((task_id, _)) => *task_id,
                        Err(e) => {
                            error!("Probe task failed: {}", e);
                            e.id()
                        }
                    };
                    if let Some(id) = running.remove(&task_id) {
                        queue.complete(id, Instant::now());
                    }
                }
            }
        }

        info!("Scheduler stopping with {} probes in flight", probes.len());
        let drain = async { while probes.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.shutdown_grace, drain).await.is_err() {
            warn!("Grace period elapsed, cancelling {} probes", probes.len());
            probes.abort_all();
            while probes.join_next().await.is_some() {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryRepository;
    use crate::monitoring::checker::{Checker, CheckerRegistry, ProbeFailure, ProbeOutcome};
    use crate::monitoring::types::CheckType;

    fn check(interval_secs: u64) -> ScheduledCheck {
        ScheduledCheck {
            id: Uuid::new_v4(),
            spec: CheckSpec::new(CheckType::Http, "https://example.com"),
            interval: Duration::from_secs(interval_secs),
        }
    }

    #[tokio::test]
    async fn test_due_checks_are_single_flight() {
        let mut queue = ScheduleQueue::new(Duration::ZERO);
        let now = Instant::now();
        let check = check(60);
        queue.upsert(check.clone(), now);

        assert_eq!(queue.pop_due(now, 10).len(), 1);
        assert!(queue.pop_due(now + Duration::from_secs(120), 10).is_empty());
        assert_eq!(queue.in_flight(), 1);

        // Reschedules from completion, not from the original due time
        let done = now + Duration::from_secs(5);
        queue.complete(check.id, done);
        assert!(queue.pop_due(done + Duration::from_secs(59), 10).is_empty());
        assert_eq!(queue.pop_due(done + Duration::from_secs(60), 10).len(), 1);
    }

    #[tokio::test]
    async fn test_pop_due_respects_limit() {
        let mut queue = ScheduleQueue::new(Duration::ZERO);
        let now = Instant::now();
        for _ in 0..5 {
            queue.upsert(check(60), now);
        }

        assert_eq!(queue.pop_due(now, 2).len(), 2);
        assert_eq!(queue.pop_due(now, 10).len(), 3);
        assert!(queue.pop_due(now, 10).is_empty());
    }

    #[tokio::test]
    async fn test_sync_removes_missing_checks() {
        let mut queue = ScheduleQueue::new(Duration::ZERO);
        let now = Instant::now();
        let kept = check(60);
        let dropped = check(60);
        queue.upsert(kept.clone(), now);
        queue.upsert(dropped.clone(), now);

        let (added, removed) = queue.sync(vec![kept.clone(), check(30)], now);

        assert_eq!((added, removed), (1, 1));
        let due: Vec<Uuid> = queue.pop_due(now, 10).into_iter().map(|c| c.id).collect();
        assert!(due.contains(&kept.id));
        assert!(!due.contains(&dropped.id));

        // Completing a removed check does not resurrect it
        queue.complete(dropped.id, now);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_resync_keeps_running_probe_single_flight() {
        let mut queue = ScheduleQueue::new(Duration::ZERO);
        let now = Instant::now();
        let check = check(60);
        queue.upsert(check.clone(), now);
        assert_eq!(queue.pop_due(now, 10).len(), 1);

        // Disabled and re-enabled while the first probe is still running
        assert_eq!(queue.sync(vec![], now), (0, 1));
        assert!(queue.is_empty());
        assert_eq!(queue.sync(vec![check.clone()], now), (1, 0));

        assert!(queue.pop_due(now + Duration::from_secs(600), 10).is_empty());
        assert_eq!(queue.in_flight(), 1);

        let done = now + Duration::from_secs(300);
        queue.complete(check.id, done);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_due(done + Duration::from_secs(60), 10).len(), 1);
    }

    #[tokio::test]
    async fn test_check_removed_in_flight_is_dropped_on_completion() {
        let mut queue = ScheduleQueue::new(Duration::ZERO);
        let now = Instant::now();
        let check = check(60);
        queue.upsert(check.clone(), now);
        queue.pop_due(now, 10);

        assert!(queue.remove(check.id));
        assert!(!queue.remove(check.id));
        queue.complete(check.id, now);

        assert_eq!(queue.in_flight(), 0);
        assert!(queue.pop_due(now + Duration::from_secs(120), 10).is_empty());
    }

    struct InstantChecker;

    #[async_trait::async_trait]
    impl Checker for InstantChecker {
        async fn check(&self, _spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
            Ok(ProbeOutcome::new(1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_checks_periodically() {
        let repository = Arc::new(MemoryRepository::new());
        let resource = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 10);
        repository.save_resource(&resource).await.unwrap();

        let mut registry = CheckerRegistry::empty();
        registry.register(CheckType::Http, Arc::new(InstantChecker));

        let (tx, mut rx) = mpsc::channel(32);
        let config = SchedulerConfig { jitter: Duration::ZERO, ..SchedulerConfig::default() };
        let scheduler = MonitoringScheduler::new(ProbeExecutor::new(registry), repository, Arc::new(tx), config);

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let mut results = Vec::new();
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        assert!((3..=4).contains(&results.len()), "got {} results", results.len());
        assert!(results.iter().all(|r| r.resource_id == resource.id && r.success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_skips_checks_claimed_elsewhere() {
        let repository = Arc::new(MemoryRepository::new());
        let resource = MonitoredResource::check("api", CheckSpec::new(CheckType::Http, "https://example.com"), 10);
        repository.save_resource(&resource).await.unwrap();

        let mut registry = CheckerRegistry::empty();
        registry.register(CheckType::Http, Arc::new(InstantChecker));

        let claims = Arc::new(ProbeClaims::new());
        let held = claims.lock(&resource.id).await;

        let (tx, mut rx) = mpsc::channel(32);
        let config = SchedulerConfig { jitter: Duration::ZERO, ..SchedulerConfig::default() };
        let scheduler =
            MonitoringScheduler::new(ProbeExecutor::new(registry), repository, Arc::new(tx), config).with_claims(claims);

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(rx.try_recv().is_err());

        drop(held);
        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert!(rx.try_recv().is_ok());
    }
}
