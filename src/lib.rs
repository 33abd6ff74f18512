//! Concierge - service-request lifecycle engine
//!
//! Clients, franchise partners and staff meet around a catalog of
//! requestable services. Concierge owns the lifecycle of each request: who
//! may move it where, what the owner is told when it moves, and how every
//! connected viewer converges on the same state without a central lock.
//!
//! ## Components
//!
//! - **Auth**: role capabilities, identity registry, confirmation-gated role changes
//! - **Store**: request, notification and principal persistence (memory or MongoDB)
//! - **Engine**: pure transition rules plus the service committing them
//! - **Notify**: fire-and-forget notification side effects with lazy retention
//! - **Realtime**: scoped fan-out hub and the viewer-side last-writer-wins cache
//! - **NATS**: cross-node bridge for realtime traffic
//! - **Journal**: per-record transition history for reporting

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod journal;
pub mod logging;
pub mod model;
pub mod nats;
pub mod notify;
pub mod platform;
pub mod realtime;
pub mod store;
pub mod types;

pub use config::{Args, PlatformConfig};
pub use platform::Platform;
pub use types::{ConciergeError, Result};
