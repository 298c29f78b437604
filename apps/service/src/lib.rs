//! Vigil monitoring and alerting engine.
//!
//! Probes checks, ingests host heartbeats, tracks status, manages incidents,
//! routes notifications and publishes live updates. [`orchestrator::Engine`]
//! wires it all together.

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod incidents;
pub mod locks;
pub mod models;
pub mod monitoring;
pub mod notifications;
pub mod orchestrator;
pub mod pool;
pub mod realtime;
pub mod status;

pub use orchestrator::{Engine, EngineConfig};
