//! MongoDB implementations of the store traits
//!
//! The request store's conditional write is a single-document `update_one`
//! whose filter pins `_id`, the expected status and the `updated_at` that was
//! read. Zero modified documents means someone else wrote first: the record
//! is re-read to tell a real status conflict from a mere field update.

use bson::doc;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::{
    NotificationDoc, PrincipalDoc, RequestDoc, NOTIFICATION_COLLECTION, PRINCIPAL_COLLECTION,
    REQUEST_COLLECTION,
};
use crate::auth::Role;
use crate::model::{
    next_update_stamp, now_millis, ChangeEvent, NewServiceRequest, Notification, NotificationId,
    Principal, PrincipalId, RequestId, RequestPatch, RequestStatus, ServiceRequest,
};
use crate::store::{Committed, NotificationStore, PrincipalStore, RequestStore};
use crate::types::{ConciergeError, Result};

/// Attempts before a write that keeps losing to field-only updates gives up
const MAX_CAS_ATTEMPTS: usize = 5;

fn newest_first(mut requests: Vec<ServiceRequest>) -> Vec<ServiceRequest> {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    requests
}

/// Convert documents, logging and skipping any that fail to parse
fn parse_all<D, T>(docs: Vec<D>, parse: impl Fn(D) -> Result<T>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|d| match parse(d) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable document");
                None
            }
        })
        .collect()
}

/// Service requests in MongoDB
pub struct MongoRequestStore {
    collection: MongoCollection<RequestDoc>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MongoRequestStore {
    pub async fn new(client: &MongoClient, change_capacity: usize) -> Result<Self> {
        let collection = client.collection::<RequestDoc>(REQUEST_COLLECTION).await?;
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Ok(Self {
            collection,
            changes,
        })
    }

    async fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>> {
        self.collection
            .find(doc! { "_id": id.as_str() })
            .await?
            .map(RequestDoc::into_request)
            .transpose()
    }

    fn emit(&self, event: &ChangeEvent) {
        let _ = self.changes.send(event.clone());
    }
}

#[async_trait::async_trait]
impl RequestStore for MongoRequestStore {
    async fn create(&self, new: NewServiceRequest) -> Result<Committed> {
        let actor = new.created_by.clone();
        let request = new.into_request(RequestId::generate(), now_millis());
        self.collection.insert(RequestDoc::from(&request)).await?;

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
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .fetch(id)
                .await?
                .ok_or_else(|| ConciergeError::NotFound(format!("request {}", id)))?;
            if current.status != expected {
                return Err(ConciergeError::Conflict(format!(
                    "request {} is {}, expected {}",
                    id, current.status, expected
                )));
            }

            let mut next = current.clone();
            patch.apply_to(&mut next);
            next.updated_at = next_update_stamp(current.updated_at);

            let result = self
                .collection
                .update(
                    RequestDoc::cas_filter(&current, expected),
                    RequestDoc::patch_update(&patch, next.updated_at),
                )
                .await?;

            if result.modified_count > 0 {
                let event = ChangeEvent::updated(&next, patch, actor);
                self.emit(&event);
                return Ok(Committed {
                    request: next,
                    event,
                });
            }
            debug!(request_id = %id, attempt, "Conditional write missed, re-reading");
        }

        Err(ConciergeError::Conflict(format!(
            "request {} kept changing during the write",
            id
        )))
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ServiceRequest>> {
        self.fetch(id).await
    }

    async fn list_by_owner(&self, owner: &PrincipalId) -> Result<Vec<ServiceRequest>> {
        let docs = self
            .collection
            .find_all(doc! { "owner_id": owner.as_str() })
            .await?;
        Ok(newest_first(parse_all(docs, RequestDoc::into_request)))
    }

    async fn list_all(&self) -> Result<Vec<ServiceRequest>> {
        let docs = self.collection.find_all(doc! {}).await?;
        Ok(newest_first(parse_all(docs, RequestDoc::into_request)))
    }

    async fn conditional_delete(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        actor: &PrincipalId,
    ) -> Result<ServiceRequest> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .fetch(id)
                .await?
                .ok_or_else(|| ConciergeError::NotFound(format!("request {}", id)))?;
            if current.status != expected {
                return Err(ConciergeError::Conflict(format!(
                    "request {} is {}, expected {}",
                    id, current.status, expected
                )));
            }

            let deleted = self
                .collection
                .delete(RequestDoc::cas_filter(&current, expected))
                .await?;
            if deleted > 0 {
                let event =
                    ChangeEvent::removed(&current, next_update_stamp(current.updated_at), actor);
                self.emit(&event);
                return Ok(current);
            }
        }

        Err(ConciergeError::Conflict(format!(
            "request {} kept changing during the delete",
            id
        )))
    }

    async fn delete_rejected(&self, actor: &PrincipalId) -> Result<usize> {
        let rejected = RequestStatus::Rejected.as_str();
        let docs = self.collection.find_all(doc! { "status": rejected }).await?;
        let candidates = parse_all(docs, RequestDoc::into_request);

        let mut removed = 0;
        for request in candidates {
            // Another purge may have won; only count what this call deleted
            let deleted = self
                .collection
                .delete(doc! { "_id": request.id.as_str(), "status": rejected })
                .await?;
            if deleted > 0 {
                removed += 1;
                let event =
                    ChangeEvent::removed(&request, next_update_stamp(request.updated_at), actor);
                self.emit(&event);
            }
        }

        if removed > 0 {
            info!(removed, actor = %actor, "Deleted rejected requests");
        }
        Ok(removed)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Notifications in MongoDB
pub struct MongoNotificationStore {
    collection: MongoCollection<NotificationDoc>,
}

impl MongoNotificationStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client
                .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
                .await?,
        })
    }
}

#[async_trait::async_trait]
impl NotificationStore for MongoNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<()> {
        self.collection
            .insert(NotificationDoc::from(&notification))
            .await
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.collection
            .find(doc! { "_id": id.to_string() })
            .await?
            .map(NotificationDoc::into_notification)
            .transpose()
    }

    async fn list_for(&self, principal: &PrincipalId) -> Result<Vec<Notification>> {
        let docs = self
            .collection
            .find_all(NotificationDoc::audience_filter(principal))
            .await?;
        let mut list = parse_all(docs, NotificationDoc::into_notification);
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn mark_read(&self, id: NotificationId) -> Result<bool> {
        let result = self
            .collection
            .update(
                doc! { "_id": id.to_string() },
                doc! { "$set": { "read": true, "metadata.written_at": bson::DateTime::now() } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .collection
            .delete_all(NotificationDoc::expired_filter(cutoff))
            .await?;
        Ok(deleted as usize)
    }

    async fn delete_expired_for(
        &self,
        principal: &PrincipalId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize> {
        let mut filter = NotificationDoc::expired_filter(cutoff);
        filter.extend(NotificationDoc::audience_filter(principal));
        let deleted = self.collection.delete_all(filter).await?;
        Ok(deleted as usize)
    }
}

/// Principal directory in MongoDB
pub struct MongoPrincipalStore {
    collection: MongoCollection<PrincipalDoc>,
}

impl MongoPrincipalStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection::<PrincipalDoc>(PRINCIPAL_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl PrincipalStore for MongoPrincipalStore {
    async fn get(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        self.collection
            .find(doc! { "_id": id.as_str() })
            .await?
            .map(PrincipalDoc::into_principal)
            .transpose()
    }

    async fn upsert(&self, principal: Principal) -> Result<()> {
        let mut set = doc! {
            "role": principal.role.as_str(),
            "display_name": principal.display_name.as_str(),
            "metadata.is_deleted": false,
            "metadata.written_at": bson::DateTime::now(),
        };
        let mut unset = doc! {};
        match principal.email {
            Some(ref email) => {
                set.insert("email", email.as_str());
            }
            None => {
                unset.insert("email", "");
            }
        }
        match principal.managed_by {
            Some(ref partner) => {
                set.insert("managed_by", partner.as_str());
            }
            None => {
                unset.insert("managed_by", "");
            }
        }

        let mut update = doc! { "$set": set };
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        self.collection
            .upsert(doc! { "_id": principal.id.as_str() }, update)
            .await?;
        Ok(())
    }

    async fn compare_and_set_role(
        &self,
        id: &PrincipalId,
        expected: Role,
        new_role: Role,
    ) -> Result<Principal> {
        let result = self
            .collection
            .update(
                doc! {
                    "_id": id.as_str(),
                    "role": expected.as_str(),
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! {
                    "$set": {
                        "role": new_role.as_str(),
                        "metadata.written_at": bson::DateTime::now(),
                    }
                },
            )
            .await?;

        let current = self
            .get(id)
            .await?
            .ok_or_else(|| ConciergeError::NotFound(format!("principal {}", id)))?;

        if result.modified_count == 0 {
            return Err(ConciergeError::Conflict(format!(
                "principal {} is now {}, expected {}",
                id, current.role, expected
            )));
        }
        Ok(current)
    }

    async fn list_managed_by(&self, partner: &PrincipalId) -> Result<Vec<Principal>> {
        let docs = self
            .collection
            .find_all(doc! { "managed_by": partner.as_str() })
            .await?;
        Ok(parse_all(docs, PrincipalDoc::into_principal))
    }

    async fn remove(&self, id: &PrincipalId) -> Result<bool> {
        let result = self
            .collection
            .soft_delete(doc! { "_id": id.as_str() })
            .await?;
        Ok(result.modified_count > 0)
    }
}
