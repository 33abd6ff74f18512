//! Roles and the capability table for service-request operations
//!
//! Read scope widens with privilege; write scopes are disjoint per role.
//! Role strings coming from storage or the identity provider are parsed
//! here and fail closed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::types::{ConciergeError, Result};

/// Principal roles, ordered by read scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Requests services for themselves
    Client = 0,
    /// Franchise partner acting for the clients it manages
    Partner = 1,
    /// Staff processing requests
    Admin = 2,
    /// Staff with role management and bulk cleanup rights
    Superuser = 3,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Client, Role::Partner, Role::Admin, Role::Superuser];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Partner => "partner",
            Role::Admin => "admin",
            Role::Superuser => "superuser",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConciergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "client" => Ok(Role::Client),
            "partner" => Ok(Role::Partner),
            "admin" => Ok(Role::Admin),
            "superuser" => Ok(Role::Superuser),
            other => Err(ConciergeError::UnknownRole(other.to_string())),
        }
    }
}

/// Operations gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateOwnRequest,
    CreateForManagedClient,
    CancelOwnPending,
    DeleteOwnRequest,
    ReadOwn,
    ReadManaged,
    ReadAll,
    ClaimRequest,
    CompleteRequest,
    RejectRequest,
    AttachResult,
    AnnounceSystemNotice,
    ReassignRole,
    PurgeRejected,
    CrossTenantReport,
}

/// Capability set granted to a role
pub fn capabilities_for(role: Role) -> BTreeSet<Capability> {
    use Capability::*;

    let owner = [CreateOwnRequest, CancelOwnPending, DeleteOwnRequest, ReadOwn];
    let staff = [
        ReadAll,
        ClaimRequest,
        CompleteRequest,
        RejectRequest,
        AttachResult,
        AnnounceSystemNotice,
    ];

    match role {
        Role::Client => owner.into_iter().collect(),
        Role::Partner => owner
            .into_iter()
            .chain([CreateForManagedClient, ReadManaged])
            .collect(),
        Role::Admin => staff.into_iter().collect(),
        Role::Superuser => staff
            .into_iter()
            .chain([ReassignRole, PurgeRejected, CrossTenantReport])
            .collect(),
    }
}

/// Capability lookup by role name; unknown names are an error, never a default
pub fn capabilities_for_name(role: &str) -> Result<BTreeSet<Capability>> {
    role.parse::<Role>().map(capabilities_for)
}

/// Check a single capability
pub fn has_capability(role: Role, capability: Capability) -> bool {
    capabilities_for(role).contains(&capability)
}

/// Fail with `InsufficientPrivilege` unless the role holds the capability
pub fn require(role: Role, capability: Capability) -> Result<()> {
    if has_capability(role, capability) {
        Ok(())
    } else {
        Err(ConciergeError::InsufficientPrivilege(format!(
            "role '{}' may not {}",
            role,
            describe(capability)
        )))
    }
}

/// Breadth of records a role may read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope {
    /// Own records only
    Own,
    /// Own records plus those of managed clients or created on their behalf
    Managed,
    /// Every record
    All,
}

/// Widest read capability a role holds; `None` means it reads nothing
pub fn read_scope(role: Role) -> Option<ReadScope> {
    let caps = capabilities_for(role);
    if caps.contains(&Capability::ReadAll) {
        Some(ReadScope::All)
    } else if caps.contains(&Capability::ReadManaged) {
        Some(ReadScope::Managed)
    } else if caps.contains(&Capability::ReadOwn) {
        Some(ReadScope::Own)
    } else {
        None
    }
}

/// Like [`read_scope`], failing with `InsufficientPrivilege`
pub fn require_read_scope(role: Role) -> Result<ReadScope> {
    read_scope(role).ok_or_else(|| {
        ConciergeError::InsufficientPrivilege(format!("role '{}' may not read records", role))
    })
}

/// Human-readable description of a capability for logs and errors
pub fn describe(capability: Capability) -> &'static str {
    match capability {
        Capability::CreateOwnRequest => "create a request for themselves",
        Capability::CreateForManagedClient => "create a request for a managed client",
        Capability::CancelOwnPending => "cancel their own pending request",
        Capability::DeleteOwnRequest => "delete their own request",
        Capability::ReadOwn => "read their own records",
        Capability::ReadManaged => "read managed clients' records",
        Capability::ReadAll => "read all records",
        Capability::ClaimRequest => "claim a request",
        Capability::CompleteRequest => "complete a request",
        Capability::RejectRequest => "reject a request",
        Capability::AttachResult => "attach a result artifact",
        Capability::AnnounceSystemNotice => "broadcast a system notice",
        Capability::ReassignRole => "reassign roles",
        Capability::PurgeRejected => "purge rejected requests",
        Capability::CrossTenantReport => "run cross-tenant reports",
    }
}
