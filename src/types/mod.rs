//! Shared types for Concierge

pub mod error;

pub use error::{ConciergeError, Result};
