//! Transition engine
//!
//! Pure function from `(request, actor, action)` to a write plan or a
//! specific rejection. Nothing here touches storage; the plan's `from`
//! status becomes the precondition of the store's conditional write.
//!
//! ```text
//!            claim              complete
//! pending ──────────▶ processing ────────▶ completed ──attach_artifact──┐
//!    │                    │                    ▲                        │
//!    │ cancel (owner)     │ reject (reason)    └────────────────────────┘
//!    ▼                    ▼
//! cancelled            rejected
//! ```

use serde::{Deserialize, Serialize};

use crate::auth::{require, Capability};
use crate::model::{Principal, RequestPatch, RequestStatus, ServiceRequest};
use crate::notify::Notice;
use crate::types::{ConciergeError, Result};

/// Actions a caller can attempt on an existing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestAction {
    /// Staff takes ownership of a pending request
    Claim,
    /// Staff finishes a request; the artifact may follow later
    Complete {
        #[serde(default)]
        artifact_ref: Option<String>,
        #[serde(default)]
        comments: Option<String>,
    },
    /// Staff declines a request with a reason
    Reject { reason: String },
    /// Owner withdraws a pending request
    Cancel,
    /// Staff sets the result on a completed request without a status change
    AttachArtifact { artifact_ref: String },
}

impl RequestAction {
    pub fn name(&self) -> &'static str {
        match self {
            RequestAction::Claim => "claim",
            RequestAction::Complete { .. } => "complete",
            RequestAction::Reject { .. } => "reject",
            RequestAction::Cancel => "cancel",
            RequestAction::AttachArtifact { .. } => "attach_artifact",
        }
    }

    /// Capability the actor's role must hold for the action
    pub fn capability(&self) -> Capability {
        match self {
            RequestAction::Claim => Capability::ClaimRequest,
            RequestAction::Complete { .. } => Capability::CompleteRequest,
            RequestAction::Reject { .. } => Capability::RejectRequest,
            RequestAction::AttachArtifact { .. } => Capability::AttachResult,
            RequestAction::Cancel => Capability::CancelOwnPending,
        }
    }

    fn is_owner_action(&self) -> bool {
        matches!(self, RequestAction::Cancel)
    }
}

/// Accepted transition: what to write and what to tell the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Status the record must still have at write time
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub patch: RequestPatch,
    pub notice: Option<Notice>,
}

impl TransitionPlan {
    /// Nothing to write (idempotent repeat)
    pub fn is_noop(&self) -> bool {
        self.patch.is_empty()
    }
}

/// Whether the state graph has an edge `from → to`
pub fn is_edge(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Cancelled)
            | (Processing, Completed)
            | (Processing, Rejected)
    )
}

/// Validate an action against the current record and the actor's role
pub fn attempt_transition(
    request: &ServiceRequest,
    actor: &Principal,
    action: &RequestAction,
) -> Result<TransitionPlan> {
    // Input validation first: an empty reason is wrong for every role
    if let RequestAction::Reject { reason } = action {
        if reason.trim().is_empty() {
            return Err(ConciergeError::MissingReason(
                "a rejection must state a reason".to_string(),
            ));
        }
    }

    // Owner actions check their capability after ownership, in the planner
    if !action.is_owner_action() {
        require(actor.role, action.capability())?;
    }

    match action {
        RequestAction::Cancel => plan_cancel(request, actor),
        RequestAction::Claim => plan_claim(request, actor),
        RequestAction::Complete {
            artifact_ref,
            comments,
        } => plan_complete(request, actor, artifact_ref, comments),
        RequestAction::Reject { reason } => plan_reject(request, actor, reason),
        RequestAction::AttachArtifact { artifact_ref } => {
            plan_attach(request, actor, artifact_ref)
        }
    }
}

fn invalid(request: &ServiceRequest, action: &str) -> ConciergeError {
    ConciergeError::InvalidTransition(format!(
        "cannot {} request {} while it is {}",
        action, request.id, request.status
    ))
}

fn plan_cancel(request: &ServiceRequest, actor: &Principal) -> Result<TransitionPlan> {
    if request.owner_id != actor.id {
        return Err(ConciergeError::InvalidTransition(format!(
            "only the owner may cancel request {}",
            request.id
        )));
    }
    if request.status != RequestStatus::Pending {
        return Err(invalid(request, "cancel"));
    }
    require(actor.role, Capability::CancelOwnPending)?;
    Ok(TransitionPlan {
        from: RequestStatus::Pending,
        to: RequestStatus::Cancelled,
        patch: RequestPatch::status(RequestStatus::Cancelled),
        notice: None,
    })
}

fn plan_claim(request: &ServiceRequest, actor: &Principal) -> Result<TransitionPlan> {
    match request.status {
        RequestStatus::Pending => {}
        // Lost the race to another claimer; retryable, unlike terminal states
        RequestStatus::Processing => {
            let handler = request
                .handled_by
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "another staff member".to_string());
            return Err(ConciergeError::Conflict(format!(
                "request {} was already claimed by {}",
                request.id, handler
            )));
        }
        _ => return Err(invalid(request, "claim")),
    }
    // Claiming is silent: the owner hears about the outcome, not the pickup
    Ok(TransitionPlan {
        from: RequestStatus::Pending,
        to: RequestStatus::Processing,
        patch: RequestPatch {
            status: Some(RequestStatus::Processing),
            handled_by: Some(actor.id.clone()),
            ..RequestPatch::default()
        },
        notice: None,
    })
}

/// Only the handling admin may finish a claimed request; an unclaimed
/// processing request can be finished by any staff member.
fn ensure_handler(request: &ServiceRequest, actor: &Principal, action: &str) -> Result<()> {
    match &request.handled_by {
        Some(handler) if handler != &actor.id => Err(ConciergeError::InsufficientPrivilege(
            format!(
                "request {} is handled by {}; {} may not {} it",
                request.id, handler, actor.id, action
            ),
        )),
        _ => Ok(()),
    }
}

fn plan_complete(
    request: &ServiceRequest,
    actor: &Principal,
    artifact_ref: &Option<String>,
    comments: &Option<String>,
) -> Result<TransitionPlan> {
    if request.status != RequestStatus::Processing {
        return Err(invalid(request, "complete"));
    }
    ensure_handler(request, actor, "complete")?;

    let artifact_ref = artifact_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let patch = RequestPatch {
        status: Some(RequestStatus::Completed),
        handled_by: request
            .handled_by
            .is_none()
            .then(|| actor.id.clone()),
        comments: comments.clone().filter(|c| !c.trim().is_empty()),
        result_artifact_ref: artifact_ref,
    };
    let mut completed = request.clone();
    patch.apply_to(&mut completed);

    Ok(TransitionPlan {
        from: RequestStatus::Processing,
        to: RequestStatus::Completed,
        patch,
        notice: Some(Notice::completed(&completed)),
    })
}

fn plan_reject(request: &ServiceRequest, actor: &Principal, reason: &str) -> Result<TransitionPlan> {
    if request.status != RequestStatus::Processing {
        return Err(invalid(request, "reject"));
    }
    ensure_handler(request, actor, "reject")?;

    let reason = reason.trim().to_string();
    Ok(TransitionPlan {
        from: RequestStatus::Processing,
        to: RequestStatus::Rejected,
        patch: RequestPatch {
            status: Some(RequestStatus::Rejected),
            handled_by: request
                .handled_by
                .is_none()
                .then(|| actor.id.clone()),
            comments: Some(reason.clone()),
            ..RequestPatch::default()
        },
        notice: Some(Notice::rejected(request, &reason)),
    })
}

fn plan_attach(
    request: &ServiceRequest,
    actor: &Principal,
    artifact_ref: &str,
) -> Result<TransitionPlan> {
    if request.status != RequestStatus::Completed {
        return Err(invalid(request, "attach an artifact to"));
    }
    ensure_handler(request, actor, "attach an artifact to")?;

    let artifact_ref = artifact_ref.trim();
    if artifact_ref.is_empty() {
        return Err(ConciergeError::BadRequest(
            "artifact reference must not be empty".to_string(),
        ));
    }

    let patch = if request.result_artifact_ref.as_deref() == Some(artifact_ref) {
        RequestPatch::default()
    } else {
        RequestPatch {
            result_artifact_ref: Some(artifact_ref.to_string()),
            ..RequestPatch::default()
        }
    };

    Ok(TransitionPlan {
        from: RequestStatus::Completed,
        to: RequestStatus::Completed,
        patch,
        notice: None,
    })
}
