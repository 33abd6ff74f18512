//! Identity, roles and authorization for Concierge
//!
//! Provides:
//! - Role parsing and the capability table (fail closed on unknown roles)
//! - The identity registry resolving principals per call
//! - The confirmation-gated role-change guard

pub mod registry;
pub mod role_change;
pub mod roles;

pub use registry::IdentityRegistry;
pub use role_change::{RoleChangeGuard, RoleChangeTicket};
pub use roles::{
    capabilities_for, capabilities_for_name, has_capability, read_scope, require,
    require_read_scope, Capability, ReadScope, Role,
};
