/// Status tracking: probe results and heartbeats in, transitions out
pub mod heartbeat;
pub mod tracker;

pub use heartbeat::{HeartbeatService, hash_api_key};
pub use tracker::{HeartbeatOutcome, StatusTracker, TrackerConfig, TransitionListener};
