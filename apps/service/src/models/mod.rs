/// Domain models shared by every engine component
pub mod heartbeat;
pub mod incident;
pub mod notification;
pub mod resource;

pub use heartbeat::{AgentCommand, HeartbeatAck, HeartbeatRequest, HostMetrics, ServiceReport};
pub use incident::{Incident, IncidentCause, IncidentStatus, SlaBreach, TimelineEntry, TimelineKind};
pub use notification::{
    ChannelKind, DispatchStatus, MessageTemplate, NotificationChannel, NotificationDispatch, NotificationEventType,
    NotificationRule, WorkingHours,
};
pub use resource::{
    MaintenanceWindow, MonitoredResource, ResourceKind, ResourceRef, ResourceSpec, Severity, Status, StatusTransition,
    TransitionCause,
};
