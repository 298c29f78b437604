/// Incident lifecycle: creation, dedup, auto-resolution, operator actions and SLA clocks
pub mod lifecycle;
pub mod manager;

pub use lifecycle::{AutoResolvePolicy, IncidentAction};
pub use manager::{IncidentConfig, IncidentManager, OperatorRequest};
