//! Notification content for lifecycle side effects
//!
//! Only creation, completion and rejection notify anyone. Claims,
//! cancellations, artifact attachment and role changes are silent.

use crate::model::{
    Audience, Notification, NotificationKind, NotificationOrigin, PrincipalId, ServiceRequest,
};

/// An automated notice produced by a transition, addressed to one principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub recipient: PrincipalId,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
}

impl Notice {
    /// Owner acknowledgement for a new request
    pub fn received(request: &ServiceRequest) -> Self {
        Self {
            recipient: request.owner_id.clone(),
            title: "Request received".to_string(),
            body: format!(
                "Your request for '{}' was received and is waiting for an operator.",
                request.requested_service_id
            ),
            kind: NotificationKind::Info,
        }
    }

    pub fn completed(request: &ServiceRequest) -> Self {
        let body = match request.result_artifact_ref {
            Some(_) => format!(
                "Your request for '{}' is ready. The result is attached.",
                request.requested_service_id
            ),
            None => format!(
                "Your request for '{}' is ready.",
                request.requested_service_id
            ),
        };
        Self {
            recipient: request.owner_id.clone(),
            title: "Request ready".to_string(),
            body,
            kind: NotificationKind::Success,
        }
    }

    /// The reason is carried verbatim so the owner knows what to fix
    pub fn rejected(request: &ServiceRequest, reason: &str) -> Self {
        Self {
            recipient: request.owner_id.clone(),
            title: "Request rejected".to_string(),
            body: format!(
                "Your request for '{}' was rejected: {}",
                request.requested_service_id,
                reason.trim()
            ),
            kind: NotificationKind::Error,
        }
    }

    pub fn into_notification(self) -> Notification {
        Notification::new(
            Audience::Principal(self.recipient),
            self.title,
            self.body,
            self.kind,
            NotificationOrigin::Automated,
        )
    }
}
