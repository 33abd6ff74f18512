//! Realtime change propagation
//!
//! - [`hub`]: server-side fan-out to scoped subscriptions
//! - [`viewer`]: client-side cache merging deltas last-writer-wins

pub mod hub;
pub mod viewer;

pub use hub::{spawn_change_pump, HubStats, RealtimeHub, RealtimeMessage, Scope, Subscription};
pub use viewer::{MergeOutcome, StagedEdits, ViewerCache};
