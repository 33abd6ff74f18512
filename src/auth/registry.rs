//! Identity & role registry
//!
//! Resolves principal ids to their current role. Callers resolve once at the
//! start of every operation and pass the result down; nothing here caches a
//! role beyond one call.

use std::sync::Arc;
use tracing::{debug, info};

use super::roles::{read_scope, ReadScope, Role};
use crate::model::{Principal, PrincipalId, ServiceRequest};
use crate::store::PrincipalStore;
use crate::types::{ConciergeError, Result};

/// Registry of principals backed by a [`PrincipalStore`]
#[derive(Clone)]
pub struct IdentityRegistry {
    store: Arc<dyn PrincipalStore>,
}

impl IdentityRegistry {
    pub fn new(store: Arc<dyn PrincipalStore>) -> Self {
        Self { store }
    }

    /// Look up a principal's current record
    pub async fn resolve(&self, id: &PrincipalId) -> Result<Principal> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ConciergeError::NotFound(format!("principal {}", id)))
    }

    /// Current role of a principal
    pub async fn role_of(&self, id: &PrincipalId) -> Result<Role> {
        Ok(self.resolve(id).await?.role)
    }

    /// Register a principal reported by the identity provider.
    ///
    /// Display attributes of an existing principal are refreshed; its role is
    /// kept, since roles only change through the role-change guard.
    pub async fn register(&self, principal: Principal) -> Result<Principal> {
        let stored = match self.store.get(&principal.id).await? {
            Some(existing) => Principal {
                role: existing.role,
                ..principal
            },
            None => {
                info!(principal = %principal.id, role = %principal.role, "Registering principal");
                principal
            }
        };
        self.store.upsert(stored.clone()).await?;
        Ok(stored)
    }

    /// Remove a principal; superusers cannot be deleted
    pub async fn remove(&self, id: &PrincipalId) -> Result<bool> {
        if let Some(existing) = self.store.get(id).await? {
            if existing.role == Role::Superuser {
                return Err(ConciergeError::InsufficientPrivilege(format!(
                    "superuser {} cannot be deleted",
                    id
                )));
            }
        }
        self.store.remove(id).await
    }

    /// Clients managed by a partner
    pub async fn managed_clients(&self, partner: &PrincipalId) -> Result<Vec<PrincipalId>> {
        Ok(self
            .store
            .list_managed_by(partner)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect())
    }

    /// Whether `viewer` manages `owner`
    pub async fn manages(&self, viewer: &Principal, owner: &PrincipalId) -> Result<bool> {
        if read_scope(viewer.role) != Some(ReadScope::Managed) {
            return Ok(false);
        }
        Ok(self
            .store
            .get(owner)
            .await?
            .is_some_and(|p| p.managed_by.as_ref() == Some(&viewer.id)))
    }

    /// Read-scope check for a single record
    pub async fn can_view(&self, viewer: &Principal, request: &ServiceRequest) -> Result<bool> {
        match read_scope(viewer.role) {
            Some(ReadScope::All) => Ok(true),
            Some(_) if request.owner_id == viewer.id => Ok(true),
            Some(ReadScope::Managed) => {
                if request.created_by == viewer.id {
                    return Ok(true);
                }
                self.manages(viewer, &request.owner_id).await
            }
            _ => Ok(false),
        }
    }

    /// Compare-and-set a role. Only the role-change guard calls this.
    pub(crate) async fn swap_role(
        &self,
        id: &PrincipalId,
        expected: Role,
        new_role: Role,
    ) -> Result<Principal> {
        let updated = self.store.compare_and_set_role(id, expected, new_role).await?;
        debug!(principal = %id, from = %expected, to = %new_role, "Role swapped");
        Ok(updated)
    }
}
