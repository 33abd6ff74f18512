//! Notification side-effect tests
//!
//! Which transitions notify the owner, what the notices say, and how the
//! retention window treats automated and operator entries.

use chrono::Duration;
use concierge::auth::Role;
use concierge::engine::CreateRequest;
use concierge::model::{Audience, NotificationKind, NotificationOrigin, Principal, PrincipalId};
use concierge::{ConciergeError, Platform, PlatformConfig};

async fn platform_with(config: PlatformConfig) -> Platform {
    let platform = Platform::in_memory(config);
    for p in [
        Principal::new("root", Role::Superuser, "Root"),
        Principal::new("admin-1", Role::Admin, "First Admin"),
        Principal::new("client-1", Role::Client, "Ada"),
        Principal::new("client-2", Role::Client, "Bo"),
    ] {
        platform.registry.register(p).await.unwrap();
    }
    platform
}

async fn platform() -> Platform {
    platform_with(PlatformConfig::default()).await
}

fn id(s: &str) -> PrincipalId {
    PrincipalId::new(s)
}

// ============================================================================
// Transition side effects
// ============================================================================

#[tokio::test]
async fn test_side_effects_per_transition() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    platform.dispatcher.flush().await;
    assert_eq!(svc.notifications(&id("client-1")).await.unwrap().len(), 1);

    // Claims are silent
    svc.claim(&id("admin-1"), &req.id).await.unwrap();
    platform.dispatcher.flush().await;
    assert_eq!(svc.notifications(&id("client-1")).await.unwrap().len(), 1);

    svc.complete(&id("admin-1"), &req.id, Some("results/r.pdf".to_string()), None)
        .await
        .unwrap();
    platform.dispatcher.flush().await;

    // Artifact attachment is silent too
    svc.attach_artifact(&id("admin-1"), &req.id, "results/r2.pdf")
        .await
        .unwrap();
    platform.dispatcher.flush().await;

    let notes = svc.notifications(&id("client-1")).await.unwrap();
    assert_eq!(notes.len(), 2);
    let kinds: Vec<_> = notes.iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::Info));
    assert!(kinds.contains(&NotificationKind::Success));
    let ready = notes
        .iter()
        .find(|n| n.kind == NotificationKind::Success)
        .unwrap();
    assert!(ready.body.contains("attached"));
    assert!(ready.audience.includes(&id("client-1")));
    assert!(notes.iter().all(|n| n.origin == NotificationOrigin::Automated));

    // Nobody else hears about it
    assert!(svc.notifications(&id("client-2")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejection_carries_reason() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-2"), CreateRequest::for_self("svc-apostille"))
        .await
        .unwrap();
    svc.claim(&id("admin-1"), &req.id).await.unwrap();
    svc.reject(&id("admin-1"), &req.id, "missing signature page")
        .await
        .unwrap();
    platform.dispatcher.flush().await;

    let notes = svc.notifications(&id("client-2")).await.unwrap();
    let rejected = notes
        .iter()
        .find(|n| n.kind == NotificationKind::Error)
        .expect("rejection notice");
    assert!(rejected.body.ends_with("missing signature page"));
}

#[tokio::test]
async fn test_cancel_is_silent() {
    let platform = platform().await;
    let svc = &platform.service;

    let req = svc
        .create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    svc.cancel(&id("client-1"), &req.id).await.unwrap();
    platform.dispatcher.flush().await;

    let notes = svc.notifications(&id("client-1")).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Info);
}

// ============================================================================
// Read state and broadcasts
// ============================================================================

#[tokio::test]
async fn test_mark_read_only_by_addressee() {
    let platform = platform().await;
    let svc = &platform.service;

    svc.create_request(&id("client-1"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    platform.dispatcher.flush().await;
    let note = svc.notifications(&id("client-1")).await.unwrap().remove(0);
    assert!(!note.read);

    let other = svc.mark_notification_read(&id("client-2"), note.id).await;
    assert!(matches!(other, Err(ConciergeError::InsufficientPrivilege(_))));

    svc.mark_notification_read(&id("client-1"), note.id)
        .await
        .unwrap();
    let notes = svc.notifications(&id("client-1")).await.unwrap();
    assert!(notes[0].read);
}

#[tokio::test]
async fn test_announce_reaches_everyone() {
    let platform = platform().await;
    let svc = &platform.service;

    let denied = svc
        .announce(&id("client-1"), "Maintenance", "Back at noon")
        .await;
    assert!(matches!(denied, Err(ConciergeError::InsufficientPrivilege(_))));

    let notice = svc
        .announce(&id("admin-1"), "Maintenance", "Back at noon")
        .await
        .unwrap();
    assert_eq!(notice.audience, Audience::Broadcast);
    assert_eq!(notice.kind, NotificationKind::System);

    for viewer in ["client-1", "client-2", "root"] {
        let notes = svc.notifications(&id(viewer)).await.unwrap();
        assert!(notes.iter().any(|n| n.id == notice.id), "{} missed it", viewer);
    }

    let err = svc.mark_notification_read(&id("client-1"), notice.id).await;
    assert!(matches!(err, Err(ConciergeError::BadRequest(_))));
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_cleanup_removes_expired_once() {
    let platform = platform_with(PlatformConfig {
        notification_retention: Duration::milliseconds(5),
        ..PlatformConfig::default()
    })
    .await;
    let svc = &platform.service;

    for n in 0..3 {
        svc.create_request(&id("client-1"), CreateRequest::for_self(format!("svc-{}", n)))
            .await
            .unwrap();
    }
    let announcement = svc
        .announce(&id("admin-1"), "Holiday hours", "Closed Friday")
        .await
        .unwrap();
    platform.dispatcher.flush().await;

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert_eq!(platform.dispatcher.cleanup_expired().await.unwrap(), 3);
    assert_eq!(platform.dispatcher.cleanup_expired().await.unwrap(), 0);

    // Operator system notices outlive the window
    let notes = svc.notifications(&id("client-1")).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, announcement.id);
}

#[tokio::test]
async fn test_expired_entries_hidden_on_read() {
    let platform = platform_with(PlatformConfig {
        notification_retention: Duration::milliseconds(5),
        ..PlatformConfig::default()
    })
    .await;
    let svc = &platform.service;

    svc.create_request(&id("client-2"), CreateRequest::for_self("svc-notary"))
        .await
        .unwrap();
    platform.dispatcher.flush().await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert!(svc.notifications(&id("client-2")).await.unwrap().is_empty());
    // Already purged by the read
    assert_eq!(platform.dispatcher.cleanup_expired().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cleanups_remove_each_entry_once() {
    let platform = platform_with(PlatformConfig {
        notification_retention: Duration::milliseconds(5),
        ..PlatformConfig::default()
    })
    .await;
    let svc = &platform.service;

    for n in 0..40 {
        let owner = if n % 2 == 0 { "client-1" } else { "client-2" };
        svc.create_request(&id(owner), CreateRequest::for_self(format!("svc-{}", n)))
            .await
            .unwrap();
    }
    platform.dispatcher.flush().await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let sweeps: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = platform.dispatcher.clone();
            tokio::spawn(async move { dispatcher.cleanup_expired().await })
        })
        .collect();

    let mut total = 0;
    for sweep in sweeps {
        total += sweep.await.unwrap().unwrap();
    }
    assert_eq!(total, 40);
    assert_eq!(platform.dispatcher.cleanup_expired().await.unwrap(), 0);
}
