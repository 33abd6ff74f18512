//! Role-change guard
//!
//! Two-step, confirmation-gated mutation of a principal's role:
//!
//! ```text
//! request_role_change ──▶ Requested ──confirm(phrase)──▶ Confirmed (registry CAS)
//!                             │
//!                             └──── ttl elapsed / cancel ──▶ dropped
//! ```
//!
//! Only a superuser may request or confirm. The confirmation phrase must be
//! typed back literally. No notification is sent when a role changes.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::registry::IdentityRegistry;
use super::roles::{require, Capability, Role};
use crate::model::{now_millis, Principal, PrincipalId};
use crate::types::{ConciergeError, Result};

/// Default lifetime of an unconfirmed ticket
pub const DEFAULT_TICKET_TTL_SECS: i64 = 300;

/// A pending, unconfirmed role change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChangeTicket {
    pub id: Uuid,
    pub requested_by: PrincipalId,
    pub target: PrincipalId,
    pub from_role: Role,
    pub new_role: Role,
    /// Text the operator must re-enter to confirm
    pub phrase: String,
    pub expires_at: DateTime<Utc>,
}

impl RoleChangeTicket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Confirmation-gated role mutation
pub struct RoleChangeGuard {
    registry: IdentityRegistry,
    tickets: DashMap<Uuid, RoleChangeTicket>,
    ttl: Duration,
}

impl RoleChangeGuard {
    pub fn new(registry: IdentityRegistry, ttl: Duration) -> Self {
        Self {
            registry,
            tickets: DashMap::new(),
            ttl,
        }
    }

    /// Phrase an operator must type to confirm moving `target` to `new_role`
    pub fn confirmation_phrase(target: &PrincipalId, new_role: Role) -> String {
        format!("change {} to {}", target, new_role)
    }

    /// Open a role-change ticket
    pub async fn request_role_change(
        &self,
        caller_id: &PrincipalId,
        target_id: &PrincipalId,
        new_role: Role,
    ) -> Result<RoleChangeTicket> {
        let caller = self.registry.resolve(caller_id).await?;
        require(caller.role, Capability::ReassignRole)?;

        if caller_id == target_id {
            return Err(ConciergeError::SelfTargetForbidden(format!(
                "superuser {} may not change their own role",
                caller_id
            )));
        }
        if new_role == Role::Superuser {
            return Err(ConciergeError::InsufficientPrivilege(
                "the superuser role cannot be assigned".to_string(),
            ));
        }

        let target = self.registry.resolve(target_id).await?;
        if target.role == Role::Superuser {
            return Err(ConciergeError::InsufficientPrivilege(format!(
                "superuser {} cannot be reassigned",
                target_id
            )));
        }
        if target.role == new_role {
            return Err(ConciergeError::BadRequest(format!(
                "{} already has role {}",
                target_id, new_role
            )));
        }

        let ticket = RoleChangeTicket {
            id: Uuid::new_v4(),
            requested_by: caller.id.clone(),
            target: target.id.clone(),
            from_role: target.role,
            new_role,
            phrase: Self::confirmation_phrase(&target.id, new_role),
            expires_at: now_millis() + self.ttl,
        };
        self.tickets.insert(ticket.id, ticket.clone());

        info!(
            ticket = %ticket.id,
            caller = %caller.id,
            target = %target.id,
            from = %target.role,
            to = %new_role,
            "Role change requested, awaiting confirmation"
        );
        Ok(ticket)
    }

    /// Confirm a ticket by re-entering its phrase; mutates the registry
    pub async fn confirm_role_change(
        &self,
        caller_id: &PrincipalId,
        ticket_id: Uuid,
        typed_phrase: Option<&str>,
    ) -> Result<Principal> {
        let ticket = self
            .tickets
            .get(&ticket_id)
            .map(|t| t.clone())
            .ok_or_else(|| ConciergeError::NotFound(format!("role change ticket {}", ticket_id)))?;

        if ticket.is_expired(now_millis()) {
            self.tickets.remove(&ticket_id);
            return Err(ConciergeError::NotFound(format!(
                "role change ticket {} expired",
                ticket_id
            )));
        }

        // Re-resolve: the caller's own role may have changed since the request
        let caller = self.registry.resolve(caller_id).await?;
        require(caller.role, Capability::ReassignRole)?;
        if caller.id != ticket.requested_by {
            return Err(ConciergeError::InsufficientPrivilege(format!(
                "ticket {} belongs to {}",
                ticket_id, ticket.requested_by
            )));
        }

        match typed_phrase.map(str::trim) {
            None | Some("") => {
                return Err(ConciergeError::ConfirmationRequired(format!(
                    "type '{}' to confirm",
                    ticket.phrase
                )))
            }
            Some(typed) if typed != ticket.phrase => {
                warn!(ticket = %ticket_id, caller = %caller.id, "Role change confirmation mismatch");
                return Err(ConciergeError::ConfirmationMismatch(format!(
                    "expected '{}'",
                    ticket.phrase
                )));
            }
            Some(_) => {}
        }

        // Single use: a concurrent confirm that removed it first wins
        if self.tickets.remove(&ticket_id).is_none() {
            return Err(ConciergeError::NotFound(format!(
                "role change ticket {} already used",
                ticket_id
            )));
        }

        let updated = self
            .registry
            .swap_role(&ticket.target, ticket.from_role, ticket.new_role)
            .await?;

        info!(
            ticket = %ticket_id,
            caller = %caller.id,
            target = %updated.id,
            role = %updated.role,
            "Role change confirmed"
        );
        Ok(updated)
    }

    /// Request and confirm in one call, for operator tooling that already
    /// collected the typed phrase
    pub async fn change_role(
        &self,
        caller_id: &PrincipalId,
        target_id: &PrincipalId,
        new_role: Role,
        typed_phrase: Option<&str>,
    ) -> Result<Principal> {
        let ticket = self.request_role_change(caller_id, target_id, new_role).await?;
        let result = self
            .confirm_role_change(caller_id, ticket.id, typed_phrase)
            .await;
        if result.is_err() {
            self.tickets.remove(&ticket.id);
        }
        result
    }

    /// Drop a pending ticket
    pub fn cancel_role_change(&self, ticket_id: Uuid) -> bool {
        self.tickets.remove(&ticket_id).is_some()
    }

    pub fn pending(&self) -> Vec<RoleChangeTicket> {
        self.tickets.iter().map(|t| t.clone()).collect()
    }

    /// Remove expired tickets, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let before = self.tickets.len();
        self.tickets.retain(|_, t| !t.is_expired(now));
        before.saturating_sub(self.tickets.len())
    }
}
