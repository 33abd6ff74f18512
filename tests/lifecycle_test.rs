//! Request lifecycle tests
//!
//! Drive the full platform (in-memory backend) through the
//! pending/processing/completed/rejected/cancelled lifecycle and check the role
//! guards, the terminal states and the claim race.

use concierge::auth::Role;
use concierge::engine::{CreateRequest, ReportFilter};
use concierge::model::{Principal, PrincipalId, RequestPatch, RequestStatus};
use concierge::{ConciergeError, Platform, PlatformConfig};
use tokio_test::{assert_err, assert_ok};

async fn platform() -> Platform {
    let platform = Platform::in_memory(PlatformConfig::default());
    for p in [
        Principal::new("root", Role::Superuser, "Root"),
        Principal::new("admin-1", Role::Admin, "First Admin"),
        Principal::new("admin-2", Role::Admin, "Second Admin"),
        Principal::new("partner-1", Role::Partner, "Franchise North"),
        Principal::new("client-1", Role::Client, "Ada").managed_by("partner-1"),
        Principal::new("client-2", Role::Client, "Bo"),
    ] {
        platform.registry.register(p).await.unwrap();
    }
    platform
}

fn id(s: &str) -> PrincipalId {
    PrincipalId::new(s)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_claim_then_complete_with_artifact() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-translation"))
        .await
        .unwrap();
    assert_eq!(req.status, RequestStatus::Pending);
    assert!(req.handled_by.is_none());

    let claimed = svc.claim(&id("admin-1"), &req.id).await.unwrap();
    assert_eq!(claimed.status, RequestStatus::Processing);
    assert_eq!(claimed.handled_by, Some(id("admin-1")));
    assert!(claimed.updated_at > req.updated_at);

    let done = svc
        .complete(
            &id("admin-1"),
            &req.id,
            Some("results/ada final.pdf".to_string()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(done.result_artifact_ref.as_deref(), Some("results/ada final.pdf"));

    let url = svc.artifact_url(&id("client-1"), &req.id).await.unwrap();
    assert_eq!(
        url.as_deref(),
        Some("http://localhost:8080/artifacts/results%2Fada%20final.pdf")
    );
}

#[tokio::test]
async fn test_complete_without_artifact_then_attach() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &req.id).await.unwrap();
    let done = svc.complete(&id("admin-1"), &req.id, None, None).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.result_artifact_ref.is_none());

    let attached = svc
        .attach_artifact(&id("admin-1"), &req.id, "results/notary.pdf")
        .await
        .unwrap();
    assert_eq!(attached.status, RequestStatus::Completed);
    assert_eq!(attached.result_artifact_ref.as_deref(), Some("results/notary.pdf"));
    assert!(attached.updated_at > done.updated_at);
}

#[tokio::test]
async fn test_reject_records_trimmed_reason() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-2"), CreateRequest::for_self("svc-apostille"))
        .await
        .unwrap();
    svc.claim(&id("admin-2"), &req.id).await.unwrap();

    let other = svc.reject(&id("admin-1"), &req.id, "not mine").await;
    assert!(matches!(other, Err(ConciergeError::InsufficientPrivilege(_))));

    let rejected = svc
        .reject(&id("admin-2"), &req.id, "  document unreadable  ")
        .await
        .unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.comments.as_deref(), Some("document unreadable"));
}

// ============================================================================
// Role guards
// ============================================================================

#[tokio::test]
async fn test_client_cannot_drive_staff_transitions() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();

    let claim = svc.claim(&id("client-1"), &req.id).await;
    assert!(matches!(claim, Err(ConciergeError::InsufficientPrivilege(_))));

    let reject = svc.reject(&id("client-1"), &req.id, "changed my mind").await;
    assert!(matches!(reject, Err(ConciergeError::InsufficientPrivilege(_))));

    svc.claim(&id("admin-1"), &req.id).await.unwrap();
    let complete = svc.complete(&id("client-1"), &req.id, None, None).await;
    assert!(matches!(complete, Err(ConciergeError::InsufficientPrivilege(_))));
}

#[tokio::test]
async fn test_empty_reason_rejected_for_every_role() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();

    for actor in ["admin-1", "root"] {
        let err = svc.reject(&id(actor), &req.id, "   ").await;
        assert!(
            matches!(err, Err(ConciergeError::MissingReason(_))),
            "{} got {:?}",
            actor,
            err
        );
    }

    let unchanged = svc.get_request(&id("client-1"), &req.id).await.unwrap();
    assert_eq!(unchanged.status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_owner_cancel_only_while_pending() {
    let platform = platform().await;
    let svc = &platform.service;

    let pending = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    let other = svc.cancel(&id("client-2"), &pending.id).await;
    assert!(other.is_err());
    let cancelled = svc.cancel(&id("client-1"), &pending.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    let busy = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &busy.id).await.unwrap();
    let err = svc.cancel(&id("client-1"), &busy.id).await;
    assert!(matches!(err, Err(ConciergeError::InvalidTransition(_))));

    let delete = svc.delete_own_request(&id("client-1"), &busy.id).await;
    assert!(matches!(delete, Err(ConciergeError::InvalidTransition(_))));
}

#[tokio::test]
async fn test_other_client_cannot_read() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();

    assert_err!(svc.get_request(&id("client-2"), &req.id).await);
    assert_ok!(svc.get_request(&id("partner-1"), &req.id).await);
    assert_ok!(svc.get_request(&id("admin-2"), &req.id).await);

    let listed = svc.list_requests(&id("client-2")).await.unwrap();
    assert!(listed.is_empty());
}

// ============================================================================
// Terminal states
// ============================================================================

#[tokio::test]
async fn test_no_path_out_of_terminal_states() {
    let platform = platform().await;
    let svc = &platform.service;

    let completed = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &completed.id).await.unwrap();
    svc.complete(&id("admin-1"), &completed.id, None, None).await.unwrap();

    let rejected = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &rejected.id).await.unwrap();
    svc.reject(&id("admin-1"), &rejected.id, "duplicate").await.unwrap();

    let cancelled = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.cancel(&id("client-1"), &cancelled.id).await.unwrap();

    for req_id in [&completed.id, &rejected.id, &cancelled.id] {
        for actor in ["admin-1", "admin-2", "root"] {
            assert!(matches!(
                svc.claim(&id(actor), req_id).await,
                Err(ConciergeError::InvalidTransition(_))
            ));
            assert!(matches!(
                svc.reject(&id(actor), req_id, "again").await,
                Err(ConciergeError::InvalidTransition(_))
            ));
        }
        assert!(svc.cancel(&id("client-1"), req_id).await.is_err());
    }

    let rejected_now = svc.get_request(&id("root"), &rejected.id).await.unwrap();
    assert_eq!(rejected_now.status, RequestStatus::Rejected);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_claims_have_one_winner() {
    let platform = platform().await;

    let req = platform
        .service
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for admin in ["admin-1", "admin-2"] {
        let svc = platform.service.clone();
        let req_id = req.id.clone();
        handles.push(tokio::spawn(async move {
            (admin, svc.claim(&id(admin), &req_id).await)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (admin, result) = handle.await.unwrap();
        match result {
            Ok(claimed) => winners.push((admin, claimed)),
            Err(ConciergeError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error for {}: {:?}", admin, other),
        }
    }

    assert_eq!(winners.len(), 1);
    let (winner, claimed) = &winners[0];
    assert_eq!(claimed.handled_by, Some(id(winner)));

    let stored = platform.service.get_request(&id("root"), &req.id).await.unwrap();
    assert_eq!(stored.handled_by, Some(id(winner)));
}

#[tokio::test]
async fn test_second_claim_after_commit_is_conflict() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &req.id).await.unwrap();

    let err = svc.claim(&id("admin-2"), &req.id).await.unwrap_err();
    assert!(matches!(err, ConciergeError::Conflict(_)), "{:?}", err);
    assert!(err.is_retryable());

    let stored = svc.get_request(&id("root"), &req.id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Processing);
    assert_eq!(stored.handled_by, Some(id("admin-1")));
}

#[tokio::test]
async fn test_stale_conditional_write_is_conflict() {
    let platform = platform().await;

    let req = platform
        .service
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    platform.service.claim(&id("admin-1"), &req.id).await.unwrap();

    // A second claimer that decided on the pending snapshot
    let stale = platform
        .requests
        .conditional_update(
            &req.id,
            RequestStatus::Pending,
            RequestPatch::status(RequestStatus::Processing),
            &id("admin-2"),
        )
        .await;
    assert!(matches!(stale, Err(ConciergeError::Conflict(_))));
    assert!(stale.unwrap_err().is_retryable());
}

// ============================================================================
// Superuser operations
// ============================================================================

#[tokio::test]
async fn test_purge_rejected_is_idempotent() {
    let platform = platform().await;
    let svc = &platform.service;

    for n in 0..3 {
        let req = svc
            .create_request(&id("client-2"), CreateRequest::for_self(format!("svc-{}", n)))
            .await
            .unwrap();
        if n < 2 {
            svc.claim(&id("admin-1"), &req.id).await.unwrap();
            svc.reject(&id("admin-1"), &req.id, "out of scope").await.unwrap();
        }
    }

    let denied = svc.purge_rejected(&id("admin-1")).await;
    assert!(matches!(denied, Err(ConciergeError::InsufficientPrivilege(_))));

    assert_eq!(svc.purge_rejected(&id("root")).await.unwrap(), 2);
    assert_eq!(svc.purge_rejected(&id("root")).await.unwrap(), 0);

    let remaining = svc
        .report(&id("root"), &ReportFilter::default())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, RequestStatus::Pending);
}

#[tokio::test]
async fn test_journal_tracks_transitions() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &req.id).await.unwrap();
    svc.complete(&id("admin-1"), &req.id, None, Some("done".to_string()))
        .await
        .unwrap();

    let history = svc.journal_for(&id("root"), &req.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|r| r.new_status).collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::Pending,
            RequestStatus::Processing,
            RequestStatus::Completed
        ]
    );
    assert_eq!(history[0].actor_id, id("client-1"));
    assert_eq!(history[1].actor_id, id("admin-1"));

    assert!(svc.journal_for(&id("admin-1"), &req.id).await.is_err());
}
