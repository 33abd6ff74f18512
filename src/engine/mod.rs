//! Request lifecycle: the pure transition engine and the service that
//! commits its plans

pub mod service;
pub mod transition;

pub use service::{CreateRequest, ReportFilter, RequestService};
pub use transition::{attempt_transition, is_edge, RequestAction, TransitionPlan};
