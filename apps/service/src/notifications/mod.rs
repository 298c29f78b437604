/// Notification routing: rule matching, cooldown, working hours, templates,
/// delivery with retries and deferred escalation
pub mod channels;
pub mod delivery;
pub mod router;
pub mod rules;
pub mod template;

pub use channels::{ChannelAdapter, ChannelRegistry, DeliveryOutcome, OutboundMessage};
pub use delivery::{DeliveryConfig, DeliveryQueue, DeliveryWorker};
pub use router::{NotificationRouter, RouterConfig};
pub use rules::AlertEvent;
