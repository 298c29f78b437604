/// Live event fan-out to subscribed observers
pub mod events;
pub mod publisher;

pub use events::RealtimeEvent;
pub use publisher::{ConnectionId, DASHBOARD_GROUP, RealtimePublisher, groups_for, is_valid_group};
