//! Persistence contracts for requests, notifications and principals
//!
//! Two backends implement these traits: [`memory`] (development and tests)
//! and the MongoDB stores in [`crate::db`]. The request store's conditional
//! write is the only serialization point in the system.

pub mod memory;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::auth::Role;
use crate::model::{
    ChangeEvent, NewServiceRequest, Notification, NotificationId, Principal, PrincipalId,
    RequestId, RequestPatch, RequestStatus, ServiceRequest,
};
use crate::types::Result;

pub use memory::{MemoryNotificationStore, MemoryPrincipalStore, MemoryRequestStore};

/// Default capacity of the change broadcast channel
pub const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// A committed write and the change event it produced
#[derive(Debug, Clone)]
pub struct Committed {
    pub request: ServiceRequest,
    pub event: ChangeEvent,
}

/// Durable table of service requests with compare-and-set updates
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new `pending` record
    async fn create(&self, new: NewServiceRequest) -> Result<Committed>;

    /// Apply `patch` only if the stored status still equals `expected`.
    ///
    /// Fails with `Conflict` when the status moved, `NotFound` when the
    /// record is gone. Assigns a strictly newer `updated_at`.
    async fn conditional_update(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        patch: RequestPatch,
        actor: &PrincipalId,
    ) -> Result<Committed>;

    async fn get(&self, id: &RequestId) -> Result<Option<ServiceRequest>>;

    async fn list_by_owner(&self, owner: &PrincipalId) -> Result<Vec<ServiceRequest>>;

    async fn list_all(&self) -> Result<Vec<ServiceRequest>>;

    /// Delete a record only if its status still equals `expected`
    async fn conditional_delete(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        actor: &PrincipalId,
    ) -> Result<ServiceRequest>;

    /// Irreversibly delete every `rejected` record, returning the count
    async fn delete_rejected(&self, actor: &PrincipalId) -> Result<usize>;

    /// Stream of committed changes
    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Notification table
#[async_trait::async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<()>;

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>>;

    /// Notifications addressed to `principal` plus broadcasts, newest first
    async fn list_for(&self, principal: &PrincipalId) -> Result<Vec<Notification>>;

    /// Returns false if the notification does not exist
    async fn mark_read(&self, id: NotificationId) -> Result<bool>;

    /// Delete automated non-system notifications created before `cutoff`
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Same as [`delete_expired`](Self::delete_expired), limited to what `principal` can see
    async fn delete_expired_for(
        &self,
        principal: &PrincipalId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize>;
}

/// Principal directory backing the identity registry
#[async_trait::async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get(&self, id: &PrincipalId) -> Result<Option<Principal>>;

    async fn upsert(&self, principal: Principal) -> Result<()>;

    /// Change a role only if it still equals `expected`
    async fn compare_and_set_role(
        &self,
        id: &PrincipalId,
        expected: Role,
        new_role: Role,
    ) -> Result<Principal>;

    async fn list_managed_by(&self, partner: &PrincipalId) -> Result<Vec<Principal>>;

    async fn remove(&self, id: &PrincipalId) -> Result<bool>;
}
