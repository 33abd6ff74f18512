//! NATS connectivity for cross-node realtime fan-out

pub mod bridge;
pub mod client;

pub use bridge::{subject_for, BridgeEnvelope, NatsBridge, NOTICES_SUBJECT, SUBJECT_PREFIX};
pub use client::NatsClient;
