//! Service request records and the patches applied to them

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::principal::PrincipalId;
use crate::types::ConciergeError;

/// Identifier of a service request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a service request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Processing,
        RequestStatus::Completed,
        RequestStatus::Rejected,
        RequestStatus::Cancelled,
    ];

    /// Terminal states have no outbound transition
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Rejected | RequestStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ConciergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(ConciergeError::Database(format!(
                "Unrecognised request status '{}'",
                other
            ))),
        }
    }
}

/// A request for a catalog service, owned by the principal who benefits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub id: RequestId,
    pub owner_id: PrincipalId,
    /// Principal who filed the request (a partner when acting for a client)
    pub created_by: PrincipalId,
    pub requested_service_id: String,
    pub status: RequestStatus,
    pub handled_by: Option<PrincipalId>,
    pub comments: Option<String>,
    pub result_artifact_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a request; the store assigns id, status and timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServiceRequest {
    pub owner_id: PrincipalId,
    pub created_by: PrincipalId,
    pub requested_service_id: String,
    #[serde(default)]
    pub comments: Option<String>,
}

impl NewServiceRequest {
    /// Materialise the pending record
    pub fn into_request(self, id: RequestId, now: DateTime<Utc>) -> ServiceRequest {
        ServiceRequest {
            id,
            owner_id: self.owner_id,
            created_by: self.created_by,
            requested_service_id: self.requested_service_id,
            status: RequestStatus::Pending,
            handled_by: None,
            comments: self.comments,
            result_artifact_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields a patch can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchField {
    Status,
    HandledBy,
    Comments,
    ResultArtifactRef,
}

/// Partial update; `None` means the field is not part of the patch.
///
/// Transitions only ever set fields, they never clear them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_by: Option<PrincipalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_artifact_ref: Option<String>,
}

impl RequestPatch {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    pub fn fields(&self) -> Vec<PatchField> {
        let mut fields = Vec::with_capacity(4);
        if self.status.is_some() {
            fields.push(PatchField::Status);
        }
        if self.handled_by.is_some() {
            fields.push(PatchField::HandledBy);
        }
        if self.comments.is_some() {
            fields.push(PatchField::Comments);
        }
        if self.result_artifact_ref.is_some() {
            fields.push(PatchField::ResultArtifactRef);
        }
        fields
    }

    pub fn contains(&self, field: PatchField) -> bool {
        match field {
            PatchField::Status => self.status.is_some(),
            PatchField::HandledBy => self.handled_by.is_some(),
            PatchField::Comments => self.comments.is_some(),
            PatchField::ResultArtifactRef => self.result_artifact_ref.is_some(),
        }
    }

    /// Apply only the fields present in the patch
    pub fn apply_to(&self, request: &mut ServiceRequest) {
        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(ref handled_by) = self.handled_by {
            request.handled_by = Some(handled_by.clone());
        }
        if let Some(ref comments) = self.comments {
            request.comments = Some(comments.clone());
        }
        if let Some(ref artifact) = self.result_artifact_ref {
            request.result_artifact_ref = Some(artifact.clone());
        }
    }

    /// Patch describing a whole record, used for creation events
    pub fn snapshot_of(request: &ServiceRequest) -> Self {
        Self {
            status: Some(request.status),
            handled_by: request.handled_by.clone(),
            comments: request.comments.clone(),
            result_artifact_ref: request.result_artifact_ref.clone(),
        }
    }
}

/// Current time truncated to the millisecond resolution every backend stores
pub fn now_millis() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap_or_else(Utc::now)
}

/// Next `updated_at` for a record: never earlier than now, always strictly
/// after the previous stamp.
pub fn next_update_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::milliseconds(1);
    now_millis().max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceRequest {
        NewServiceRequest {
            owner_id: "client-1".into(),
            created_by: "client-1".into(),
            requested_service_id: "svc-tax-filing".to_string(),
            comments: None,
        }
        .into_request(RequestId::new("r1"), now_millis())
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_parse_matches_display() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("archived".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut request = sample();
        request.comments = Some("please hurry".to_string());

        let patch = RequestPatch {
            status: Some(RequestStatus::Processing),
            handled_by: Some("admin-1".into()),
            ..RequestPatch::default()
        };
        patch.apply_to(&mut request);

        assert_eq!(request.status, RequestStatus::Processing);
        assert_eq!(request.handled_by, Some(PrincipalId::from("admin-1")));
        assert_eq!(request.comments.as_deref(), Some("please hurry"));
        assert_eq!(patch.fields(), vec![PatchField::Status, PatchField::HandledBy]);
    }

    #[test]
    fn test_update_stamp_strictly_increases() {
        let previous = now_millis() + Duration::seconds(30);
        let next = next_update_stamp(previous);
        assert_eq!(next, previous + Duration::milliseconds(1));

        let past = now_millis() - Duration::hours(1);
        assert!(next_update_stamp(past) > past + Duration::milliseconds(1));
    }

    #[test]
    fn test_serialized_shape_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["ownerId"], "client-1");
        assert!(json["resultArtifactRef"].is_null());
    }
}
