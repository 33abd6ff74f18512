//! Change events emitted by the request store after every committed write

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::principal::PrincipalId;
use super::request::{RequestId, RequestPatch, RequestStatus, ServiceRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upserted,
    Removed,
}

/// Delta pushed to realtime viewers.
///
/// `updated_at` is server-assigned and strictly increasing per record, so
/// viewers order events by it rather than by arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub record_id: RequestId,
    pub owner_id: PrincipalId,
    pub created_by: PrincipalId,
    pub kind: ChangeKind,
    pub new_status: RequestStatus,
    pub patch: RequestPatch,
    pub updated_at: DateTime<Utc>,
    pub actor_id: PrincipalId,
    /// Full record, present only on creation so viewers can insert it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ServiceRequest>,
}

impl ChangeEvent {
    /// Event for a fresh record: the patch carries every field
    pub fn created(request: &ServiceRequest, actor: &PrincipalId) -> Self {
        Self {
            record_id: request.id.clone(),
            owner_id: request.owner_id.clone(),
            created_by: request.created_by.clone(),
            kind: ChangeKind::Upserted,
            new_status: request.status,
            patch: RequestPatch::snapshot_of(request),
            updated_at: request.updated_at,
            actor_id: actor.clone(),
            snapshot: Some(request.clone()),
        }
    }

    /// Event for a committed conditional update
    pub fn updated(request: &ServiceRequest, patch: RequestPatch, actor: &PrincipalId) -> Self {
        Self {
            record_id: request.id.clone(),
            owner_id: request.owner_id.clone(),
            created_by: request.created_by.clone(),
            kind: ChangeKind::Upserted,
            new_status: request.status,
            patch,
            updated_at: request.updated_at,
            actor_id: actor.clone(),
            snapshot: None,
        }
    }

    /// Event for a deleted record; `at` must be newer than the last update
    pub fn removed(request: &ServiceRequest, at: DateTime<Utc>, actor: &PrincipalId) -> Self {
        Self {
            record_id: request.id.clone(),
            owner_id: request.owner_id.clone(),
            created_by: request.created_by.clone(),
            kind: ChangeKind::Removed,
            new_status: request.status,
            patch: RequestPatch::default(),
            updated_at: at,
            actor_id: actor.clone(),
            snapshot: None,
        }
    }

    /// Whether this event changed the record's status (journal-worthy)
    pub fn is_transition(&self) -> bool {
        self.kind == ChangeKind::Upserted && self.patch.status.is_some()
    }
}

/// Entry of the reporting event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub record_id: RequestId,
    pub new_status: RequestStatus,
    pub timestamp: DateTime<Utc>,
    pub actor_id: PrincipalId,
}

impl From<&ChangeEvent> for TransitionRecord {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            record_id: event.record_id.clone(),
            new_status: event.new_status,
            timestamp: event.updated_at,
            actor_id: event.actor_id.clone(),
        }
    }
}
