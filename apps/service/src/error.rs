use thiserror::Error;
use uuid::Uuid;

use crate::incidents::IncidentAction;
use crate::models::IncidentStatus;

/// Rejected incident operations
#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("Incident {0} not found")]
    NotFound(Uuid),

    #[error("Cannot {action} an incident that is {status}")]
    IllegalTransition { action: IncidentAction, status: IncidentStatus },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Repository failure: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Rejected heartbeats
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Unknown or missing API key")]
    Unauthorized,

    #[error("Monitoring is disabled for host {0}")]
    Inactive(Uuid),

    #[error("Repository failure: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Rejected check or resource provisioning
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Private/local addresses are not allowed: {0}")]
    PrivateAddress(String),

    #[error("Port {0} is blocked (system/database port)")]
    BlockedPort(u16),

    #[error("Check interval {value}s is out of range ({min}-{max}s)")]
    Interval { value: u64, min: u64, max: u64 },

    #[error("Timeout {value}s is out of range ({min}-{max}s)")]
    Timeout { value: u64, min: u64, max: u64 },

    #[error("Down threshold {value}s is out of range ({min}-{max}s)")]
    DownThreshold { value: u64, min: u64, max: u64 },

    #[error("Resource is not a check")]
    NotACheck,
}

/// Rejected resource provisioning
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Repository failure: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Rejected operator requests against a resource or dispatch
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{0} {1} not found")]
    NotFound(&'static str, Uuid),

    #[error("Resource '{0}' is not a {1}")]
    WrongKind(String, &'static str),

    #[error("Repository failure: {0}")]
    Repository(#[from] anyhow::Error),
}
