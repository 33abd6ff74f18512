//! Service request document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{PrincipalId, RequestId, RequestPatch, RequestStatus, ServiceRequest};
use crate::types::Result;

pub const REQUEST_COLLECTION: &str = "service_requests";

/// Service request stored in MongoDB.
///
/// `updated_at` is part of the conditional-write filter, so it is stored as a
/// BSON datetime at the same millisecond resolution the model uses.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RequestDoc {
    /// Request id
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub owner_id: String,
    pub created_by: String,
    pub requested_service_id: String,

    /// Lowercase status name, parsed on read
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_artifact_ref: Option<String>,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl RequestDoc {
    /// Convert to the domain record; an unknown status is an error
    pub fn into_request(self) -> Result<ServiceRequest> {
        Ok(ServiceRequest {
            id: RequestId::new(self._id),
            owner_id: PrincipalId::new(self.owner_id),
            created_by: PrincipalId::new(self.created_by),
            requested_service_id: self.requested_service_id,
            status: self.status.parse()?,
            handled_by: self.handled_by.map(PrincipalId::new),
            comments: self.comments,
            result_artifact_ref: self.result_artifact_ref,
            created_at: self.created_at.to_chrono(),
            updated_at: self.updated_at.to_chrono(),
        })
    }

    /// Filter matching the record only while it is unchanged
    pub fn cas_filter(request: &ServiceRequest, expected: RequestStatus) -> Document {
        doc! {
            "_id": request.id.as_str(),
            "status": expected.as_str(),
            "updated_at": DateTime::from_chrono(request.updated_at),
        }
    }

    /// `$set` body for a patch plus the new stamp
    pub fn patch_update(patch: &RequestPatch, updated_at: chrono::DateTime<chrono::Utc>) -> Document {
        let mut set = doc! {
            "updated_at": DateTime::from_chrono(updated_at),
            "metadata.written_at": DateTime::now(),
        };
        if let Some(status) = patch.status {
            set.insert("status", status.as_str());
        }
        if let Some(ref handled_by) = patch.handled_by {
            set.insert("handled_by", handled_by.as_str());
        }
        if let Some(ref comments) = patch.comments {
            set.insert("comments", comments.as_str());
        }
        if let Some(ref artifact) = patch.result_artifact_ref {
            set.insert("result_artifact_ref", artifact.as_str());
        }
        doc! { "$set": set }
    }
}

impl From<&ServiceRequest> for RequestDoc {
    fn from(request: &ServiceRequest) -> Self {
        Self {
            _id: request.id.as_str().to_string(),
            metadata: Metadata::new(),
            owner_id: request.owner_id.as_str().to_string(),
            created_by: request.created_by.as_str().to_string(),
            requested_service_id: request.requested_service_id.clone(),
            status: request.status.as_str().to_string(),
            handled_by: request.handled_by.as_ref().map(|p| p.as_str().to_string()),
            comments: request.comments.clone(),
            result_artifact_ref: request.result_artifact_ref.clone(),
            created_at: DateTime::from_chrono(request.created_at),
            updated_at: DateTime::from_chrono(request.updated_at),
        }
    }
}

impl IntoIndexes for RequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "owner_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("owner_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1 },
                Some(IndexOptions::builder().name("status_index".to_string()).build()),
            ),
            (
                doc! { "created_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("created_by_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for RequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
