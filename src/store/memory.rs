//! In-memory stores
//!
//! DashMap-backed implementations. The per-shard write lock held by
//! `get_mut`/`remove_if` makes the status check and the write one atomic step.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{Committed, NotificationStore, PrincipalStore, RequestStore, DEFAULT_CHANGE_CAPACITY};
use crate::auth::Role;
use crate::model::{
    next_update_stamp, now_millis, ChangeEvent, NewServiceRequest, Notification, NotificationId,
    Principal, PrincipalId, RequestId, RequestPatch, RequestStatus, ServiceRequest,
};
use crate::types::{ConciergeError, Result};

/// Request table held in memory
pub struct MemoryRequestStore {
    records: DashMap<RequestId, ServiceRequest>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create a store whose change channel buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            records: DashMap::new(),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn emit(&self, event: &ChangeEvent) {
        // No receivers is fine: nobody is watching yet
        let _ = self.changes.send(event.clone());
    }

    fn missing_or_conflict(&self, id: &RequestId, expected: RequestStatus) -> ConciergeError {
        match self.records.get(id) {
            Some(current) => ConciergeError::Conflict(format!(
                "request {} is {}, expected {}",
                id, current.status, expected
            )),
            None => ConciergeError::NotFound(format!("request {}", id)),
        }
    }
}

impl Default for MemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, new: NewServiceRequest) -> Result<Committed> {
        let actor = new.created_by.clone();
        let request = new.into_request(RequestId::generate(), now_millis());
        self.records.insert(request.id.clone(), request.clone());

        let event = ChangeEvent::created(&request, &actor);
        self.emit(&event);
        debug!(request_id = %request.id, owner = %request.owner_id, "Request stored");
        Ok(Committed { request, event })
    }

    async fn conditional_update(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        patch: RequestPatch,
        actor: &PrincipalId,
    ) -> Result<Committed> {
        let request = {
            let Some(mut entry) = self.records.get_mut(id) else {
                return Err(ConciergeError::NotFound(format!("request {}", id)));
            };
            if entry.status != expected {
                return Err(ConciergeError::Conflict(format!(
                    "request {} is {}, expected {}",
                    id, entry.status, expected
                )));
            }
            patch.apply_to(&mut entry);
            entry.updated_at = next_update_stamp(entry.updated_at);
            entry.clone()
        };

        let event = ChangeEvent::updated(&request, patch, actor);
        self.emit(&event);
        Ok(Committed { request, event })
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ServiceRequest>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list_by_owner(&self, owner: &PrincipalId) -> Result<Vec<ServiceRequest>> {
        let mut list: Vec<ServiceRequest> = self
            .records
            .iter()
            .filter(|r| &r.owner_id == owner)
            .map(|r| r.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn list_all(&self) -> Result<Vec<ServiceRequest>> {
        let mut list: Vec<ServiceRequest> = self.records.iter().map(|r| r.clone()).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn conditional_delete(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        actor: &PrincipalId,
    ) -> Result<ServiceRequest> {
        match self.records.remove_if(id, |_, r| r.status == expected) {
            Some((_, removed)) => {
                let event = ChangeEvent::removed(&removed, next_update_stamp(removed.updated_at), actor);
                self.emit(&event);
                Ok(removed)
            }
            None => Err(self.missing_or_conflict(id, expected)),
        }
    }

    async fn delete_rejected(&self, actor: &PrincipalId) -> Result<usize> {
        let candidates: Vec<RequestId> = self
            .records
            .iter()
            .filter(|r| r.status == RequestStatus::Rejected)
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            // Rejected is terminal, but another purge may have won the race
            if let Some((_, request)) = self
                .records
                .remove_if(&id, |_, r| r.status == RequestStatus::Rejected)
            {
                removed += 1;
                let event =
                    ChangeEvent::removed(&request, next_update_stamp(request.updated_at), actor);
                self.emit(&event);
            }
        }
        Ok(removed)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Notification table held in memory
#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<NotificationId, Notification>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    fn purge(&self, cutoff: DateTime<Utc>, scope: Option<&PrincipalId>) -> usize {
        let expired =
            |n: &Notification| n.is_expired(cutoff) && scope.map_or(true, |p| n.audience.includes(p));

        let candidates: Vec<NotificationId> = self
            .notifications
            .iter()
            .filter(|n| expired(n.value()))
            .map(|n| *n.key())
            .collect();

        // remove_if only counts rows this call actually deleted, so
        // concurrent sweeps never double count
        candidates
            .into_iter()
            .filter(|id| self.notifications.remove_if(id, |_, n| expired(n)).is_some())
            .count()
    }
}

#[async_trait::async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<()> {
        self.notifications.insert(notification.id, notification);
        Ok(())
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn list_for(&self, principal: &PrincipalId) -> Result<Vec<Notification>> {
        let mut list: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.audience.includes(principal))
            .map(|n| n.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<bool> {
        match self.notifications.get_mut(&id) {
            Some(mut n) => {
                n.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.purge(cutoff, None))
    }

    async fn delete_expired_for(
        &self,
        principal: &PrincipalId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self.purge(cutoff, Some(principal)))
    }
}

/// Principal directory held in memory
#[derive(Default)]
pub struct MemoryPrincipalStore {
    principals: DashMap<PrincipalId, Principal>,
}

impl MemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn get(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        Ok(self.principals.get(id).map(|p| p.clone()))
    }

    async fn upsert(&self, principal: Principal) -> Result<()> {
        self.principals.insert(principal.id.clone(), principal);
        Ok(())
    }

    async fn compare_and_set_role(
        &self,
        id: &PrincipalId,
        expected: Role,
        new_role: Role,
    ) -> Result<Principal> {
        let Some(mut entry) = self.principals.get_mut(id) else {
            return Err(ConciergeError::NotFound(format!("principal {}", id)));
        };
        if entry.role != expected {
            return Err(ConciergeError::Conflict(format!(
                "principal {} is now {}, expected {}",
                id, entry.role, expected
            )));
        }
        entry.role = new_role;
        Ok(entry.clone())
    }

    async fn list_managed_by(&self, partner: &PrincipalId) -> Result<Vec<Principal>> {
        Ok(self
            .principals
            .iter()
            .filter(|p| p.managed_by.as_ref() == Some(partner))
            .map(|p| p.clone())
            .collect())
    }

    async fn remove(&self, id: &PrincipalId) -> Result<bool> {
        Ok(self.principals.remove(id).is_some())
    }
}
