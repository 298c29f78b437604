/// Monitoring engine module - active probing of checks
///
/// This module is responsible for:
/// - Executing HTTP/TCP/Ping/DNS probes with classified failures
/// - Scheduling checks by due time with bounded concurrency
/// - Validating check provisioning
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::{Checker, CheckerRegistry};
pub use executor::ProbeExecutor;
pub use scheduler::{MonitoringScheduler, ProbeClaims, ProbeResultSink, ScheduleQueue, ScheduledCheck, SchedulerConfig};
pub use types::{CheckSpec, CheckType, ProbeErrorKind, ProbeResult};
