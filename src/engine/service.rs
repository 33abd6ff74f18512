//! Request service
//!
//! Entry point for every lifecycle operation. Each call resolves the actor's
//! role from the registry, asks the transition engine for a plan, commits it
//! through the store's conditional write and only then fires side effects
//! (journal, notification). A rejected call has no side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::transition::{attempt_transition, RequestAction};
use crate::artifacts::ArtifactResolver;
use crate::auth::{require, require_read_scope, Capability, IdentityRegistry, ReadScope};
use crate::journal::EventJournal;
use crate::model::{
    NewServiceRequest, Notification, NotificationId, Principal, PrincipalId, RequestId,
    RequestStatus, ServiceRequest, TransitionRecord,
};
use crate::notify::{Notice, NotificationDispatcher};
use crate::realtime::{RealtimeHub, Scope, Subscription};
use crate::store::RequestStore;
use crate::types::{ConciergeError, Result};

/// Input for filing a new request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Client a partner is filing for; `None` files for the caller
    #[serde(default)]
    pub on_behalf_of: Option<PrincipalId>,
    pub requested_service_id: String,
    #[serde(default)]
    pub comments: Option<String>,
}

impl CreateRequest {
    pub fn for_self(requested_service_id: impl Into<String>) -> Self {
        Self {
            on_behalf_of: None,
            requested_service_id: requested_service_id.into(),
            comments: None,
        }
    }

    pub fn on_behalf_of(mut self, owner: impl Into<PrincipalId>) -> Self {
        self.on_behalf_of = Some(owner.into());
        self
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }
}

/// Cross-tenant report filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFilter {
    #[serde(default)]
    pub owner: Option<PrincipalId>,
    #[serde(default)]
    pub created_by: Option<PrincipalId>,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default)]
    pub handled_by: Option<PrincipalId>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
}

impl ReportFilter {
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        self.owner.as_ref().map_or(true, |o| &request.owner_id == o)
            && self
                .created_by
                .as_ref()
                .map_or(true, |c| &request.created_by == c)
            && self.status.map_or(true, |s| request.status == s)
            && self
                .handled_by
                .as_ref()
                .map_or(true, |h| request.handled_by.as_ref() == Some(h))
            && self.created_after.map_or(true, |t| request.created_at >= t)
            && self.created_before.map_or(true, |t| request.created_at < t)
    }
}

/// Lifecycle operations over the request store
#[derive(Clone)]
pub struct RequestService {
    registry: IdentityRegistry,
    store: Arc<dyn RequestStore>,
    dispatcher: Arc<NotificationDispatcher>,
    hub: Arc<RealtimeHub>,
    journal: Arc<EventJournal>,
    artifacts: Arc<dyn ArtifactResolver>,
}

impl RequestService {
    pub fn new(
        registry: IdentityRegistry,
        store: Arc<dyn RequestStore>,
        dispatcher: Arc<NotificationDispatcher>,
        hub: Arc<RealtimeHub>,
        journal: Arc<EventJournal>,
        artifacts: Arc<dyn ArtifactResolver>,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            hub,
            journal,
            artifacts,
        }
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// File a new `pending` request
    pub async fn create_request(
        &self,
        actor_id: &PrincipalId,
        input: CreateRequest,
    ) -> Result<ServiceRequest> {
        let requested_service_id = input.requested_service_id.trim().to_string();
        if requested_service_id.is_empty() {
            return Err(ConciergeError::BadRequest(
                "requested service id is empty".to_string(),
            ));
        }

        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::CreateOwnRequest)?;

        let owner_id = match input.on_behalf_of {
            None => actor.id.clone(),
            Some(owner) if owner == actor.id => owner,
            Some(owner) => {
                require(actor.role, Capability::CreateForManagedClient)?;
                if !self.registry.manages(&actor, &owner).await? {
                    return Err(ConciergeError::InsufficientPrivilege(format!(
                        "{} does not manage {}",
                        actor.id, owner
                    )));
                }
                owner
            }
        };

        let committed = self
            .store
            .create(NewServiceRequest {
                owner_id,
                created_by: actor.id.clone(),
                requested_service_id,
                comments: input.comments.filter(|c| !c.trim().is_empty()),
            })
            .await?;

        self.journal.record(&committed.event);
        self.dispatcher
            .dispatch_notice(Notice::received(&committed.request));

        info!(
            request_id = %committed.request.id,
            owner = %committed.request.owner_id,
            actor = %actor.id,
            service = %committed.request.requested_service_id,
            "Request created"
        );
        Ok(committed.request)
    }

    /// Apply a lifecycle action.
    ///
    /// Fails with `Conflict` when another caller changed the status first;
    /// the caller should re-read and decide again.
    pub async fn perform(
        &self,
        actor_id: &PrincipalId,
        request_id: &RequestId,
        action: RequestAction,
    ) -> Result<ServiceRequest> {
        let actor = self.registry.resolve(actor_id).await?;
        let current = self.load(request_id).await?;

        // Every accepted plan is either staff-only or owner-only, so the
        // engine's guards also enforce read scope
        let plan = match attempt_transition(&current, &actor, &action) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(
                    request_id = %request_id,
                    actor = %actor.id,
                    action = action.name(),
                    error = %e,
                    "Transition refused"
                );
                return Err(e);
            }
        };

        if plan.is_noop() {
            return Ok(current);
        }

        let committed = match self
            .store
            .conditional_update(request_id, plan.from, plan.patch, &actor.id)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                if e.is_retryable() {
                    warn!(request_id = %request_id, actor = %actor.id, action = action.name(), "Lost update race");
                }
                return Err(e);
            }
        };

        self.journal.record(&committed.event);
        if let Some(notice) = plan.notice {
            self.dispatcher.dispatch_notice(notice);
        }

        info!(
            request_id = %request_id,
            actor = %actor.id,
            action = action.name(),
            from = %plan.from,
            to = %committed.request.status,
            "Request transitioned"
        );
        Ok(committed.request)
    }

    pub async fn claim(&self, actor_id: &PrincipalId, id: &RequestId) -> Result<ServiceRequest> {
        self.perform(actor_id, id, RequestAction::Claim).await
    }

    pub async fn complete(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
        artifact_ref: Option<String>,
        comments: Option<String>,
    ) -> Result<ServiceRequest> {
        self.perform(
            actor_id,
            id,
            RequestAction::Complete {
                artifact_ref,
                comments,
            },
        )
        .await
    }

    pub async fn reject(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
        reason: impl Into<String>,
    ) -> Result<ServiceRequest> {
        self.perform(
            actor_id,
            id,
            RequestAction::Reject {
                reason: reason.into(),
            },
        )
        .await
    }

    pub async fn cancel(&self, actor_id: &PrincipalId, id: &RequestId) -> Result<ServiceRequest> {
        self.perform(actor_id, id, RequestAction::Cancel).await
    }

    pub async fn attach_artifact(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
        artifact_ref: impl Into<String>,
    ) -> Result<ServiceRequest> {
        self.perform(
            actor_id,
            id,
            RequestAction::AttachArtifact {
                artifact_ref: artifact_ref.into(),
            },
        )
        .await
    }

    /// Read one record within the caller's read scope
    pub async fn get_request(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
    ) -> Result<ServiceRequest> {
        let actor = self.registry.resolve(actor_id).await?;
        let request = self.load(id).await?;
        if !self.registry.can_view(&actor, &request).await? {
            return Err(ConciergeError::InsufficientPrivilege(format!(
                "{} may not read request {}",
                actor.id, id
            )));
        }
        Ok(request)
    }

    /// Every record the caller may see, newest first. Also the resync source
    /// for realtime viewers.
    pub async fn list_requests(&self, actor_id: &PrincipalId) -> Result<Vec<ServiceRequest>> {
        let actor = self.registry.resolve(actor_id).await?;
        match require_read_scope(actor.role)? {
            ReadScope::All => self.store.list_all().await,
            ReadScope::Own => self.store.list_by_owner(&actor.id).await,
            ReadScope::Managed => {
                let managed: HashSet<PrincipalId> = self
                    .registry
                    .managed_clients(&actor.id)
                    .await?
                    .into_iter()
                    .collect();
                Ok(self
                    .store
                    .list_all()
                    .await?
                    .into_iter()
                    .filter(|r| {
                        r.owner_id == actor.id
                            || r.created_by == actor.id
                            || managed.contains(&r.owner_id)
                    })
                    .collect())
            }
        }
    }

    /// Owner deletes their own record. Not allowed while it is being processed.
    pub async fn delete_own_request(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
    ) -> Result<ServiceRequest> {
        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::DeleteOwnRequest)?;

        let request = self.load(id).await?;
        if request.owner_id != actor.id {
            return Err(ConciergeError::InsufficientPrivilege(format!(
                "only the owner may delete request {}",
                id
            )));
        }
        if request.status == RequestStatus::Processing {
            return Err(ConciergeError::InvalidTransition(format!(
                "request {} is being processed",
                id
            )));
        }

        let removed = self
            .store
            .conditional_delete(id, request.status, &actor.id)
            .await?;
        info!(request_id = %id, actor = %actor.id, "Request deleted by owner");
        Ok(removed)
    }

    /// Superuser bulk delete of every `rejected` record. Idempotent.
    pub async fn purge_rejected(&self, actor_id: &PrincipalId) -> Result<usize> {
        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::PurgeRejected)?;
        let removed = self.store.delete_rejected(&actor.id).await?;
        info!(actor = %actor.id, removed, "Rejected requests purged");
        Ok(removed)
    }

    /// Superuser cross-tenant listing
    pub async fn report(
        &self,
        actor_id: &PrincipalId,
        filter: &ReportFilter,
    ) -> Result<Vec<ServiceRequest>> {
        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::CrossTenantReport)?;
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    /// Transition history of one record
    pub async fn journal_for(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
    ) -> Result<Vec<TransitionRecord>> {
        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::CrossTenantReport)?;
        Ok(self.journal.for_record(id))
    }

    /// Full event stream for the reporting consumer
    pub async fn journal_snapshot(&self, actor_id: &PrincipalId) -> Result<Vec<TransitionRecord>> {
        let actor = self.registry.resolve(actor_id).await?;
        require(actor.role, Capability::CrossTenantReport)?;
        Ok(self.journal.snapshot())
    }

    /// Fetchable location of a record's result artifact
    pub async fn artifact_url(
        &self,
        actor_id: &PrincipalId,
        id: &RequestId,
    ) -> Result<Option<String>> {
        let request = self.get_request(actor_id, id).await?;
        request
            .result_artifact_ref
            .as_deref()
            .map(|r| self.artifacts.resolve(r))
            .transpose()
    }

    /// Subscribe to every record the caller may see
    pub async fn watch(&self, viewer_id: &PrincipalId) -> Result<Subscription> {
        let viewer = self.registry.resolve(viewer_id).await?;
        let scope = match require_read_scope(viewer.role)? {
            ReadScope::All => Scope::AllRecords,
            ReadScope::Own => Scope::Owner(viewer.id.clone()),
            ReadScope::Managed => Scope::Managed {
                partner: viewer.id.clone(),
                owners: self
                    .registry
                    .managed_clients(&viewer.id)
                    .await?
                    .into_iter()
                    .collect(),
            },
        };
        Ok(self.hub.subscribe(viewer.id, scope))
    }

    /// Subscribe to one owner's records
    pub async fn watch_owner(
        &self,
        viewer_id: &PrincipalId,
        owner_id: &PrincipalId,
    ) -> Result<Subscription> {
        let viewer = self.registry.resolve(viewer_id).await?;
        let entitled = require_read_scope(viewer.role)? == ReadScope::All
            || &viewer.id == owner_id
            || self.registry.manages(&viewer, owner_id).await?;
        if !entitled {
            return Err(ConciergeError::InsufficientPrivilege(format!(
                "{} may not watch {}",
                viewer.id, owner_id
            )));
        }
        Ok(self.hub.subscribe(viewer.id, Scope::Owner(owner_id.clone())))
    }

    /// Caller's own and broadcast notifications
    pub async fn notifications(&self, actor_id: &PrincipalId) -> Result<Vec<Notification>> {
        let actor = self.registry.resolve(actor_id).await?;
        self.dispatcher.list_for(&actor.id).await
    }

    pub async fn mark_notification_read(
        &self,
        actor_id: &PrincipalId,
        id: NotificationId,
    ) -> Result<()> {
        let actor = self.registry.resolve(actor_id).await?;
        self.dispatcher.mark_read(&actor.id, id).await
    }

    /// Staff `system` broadcast
    pub async fn announce(
        &self,
        actor_id: &PrincipalId,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Notification> {
        let actor: Principal = self.registry.resolve(actor_id).await?;
        self.dispatcher.announce(&actor, title, body).await
    }

    async fn load(&self, id: &RequestId) -> Result<ServiceRequest> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ConciergeError::NotFound(format!("request {}", id)))
    }
}
