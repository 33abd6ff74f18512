//! Notification dispatcher
//!
//! Transition side effects are handed to a background worker over an
//! unbounded channel so the caller never waits on the notification write.
//! The worker persists each notification and then pushes it to the realtime
//! hub. A failed write is logged and counted; it never reaches the caller
//! that triggered the transition.
//!
//! Retention: automated, non-system notifications expire after the
//! retention window. They are purged lazily when an audience lists its
//! notifications, or in bulk by [`NotificationDispatcher::cleanup_expired`].

use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::templates::Notice;
use crate::auth::{require, Capability};
use crate::model::{
    now_millis, Audience, Notification, NotificationId, NotificationKind, NotificationOrigin,
    Principal, PrincipalId,
};
use crate::realtime::RealtimeHub;
use crate::store::NotificationStore;
use crate::types::{ConciergeError, Result};

/// Default retention of automated notifications
pub const DEFAULT_RETENTION_HOURS: i64 = 72;

enum Job {
    Deliver(Notification),
    /// Acknowledged once every job queued before it is processed
    Flush(oneshot::Sender<()>),
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Fire-and-forget notification writer plus retention and read operations
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    hub: Arc<RealtimeHub>,
    jobs: mpsc::UnboundedSender<Job>,
    retention: Duration,
    counters: Arc<Counters>,
}

impl NotificationDispatcher {
    /// Create the dispatcher and start its worker. Must run inside a tokio runtime.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        hub: Arc<RealtimeHub>,
        retention: Duration,
    ) -> Arc<Self> {
        let (jobs, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(worker_task(
            rx,
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&counters),
        ));

        info!(
            retention_hours = retention.num_hours(),
            "Notification dispatcher started"
        );

        Arc::new(Self {
            store,
            hub,
            jobs,
            retention,
            counters,
        })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Queue an automated notification. Returns immediately.
    pub fn dispatch(
        &self,
        audience: Audience,
        title: impl Into<String>,
        body: impl Into<String>,
        kind: NotificationKind,
    ) -> NotificationId {
        self.enqueue(Notification::new(
            audience,
            title,
            body,
            kind,
            NotificationOrigin::Automated,
        ))
    }

    /// Queue a transition notice
    pub fn dispatch_notice(&self, notice: Notice) -> NotificationId {
        self.enqueue(notice.into_notification())
    }

    fn enqueue(&self, notification: Notification) -> NotificationId {
        let id = notification.id;
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if self.jobs.send(Job::Deliver(notification)).is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(notification = %id, "Notification worker stopped, notice dropped");
        }
        id
    }

    /// Wait until every notification queued so far has been processed
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(Job::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Delete expired automated notifications across all audiences.
    ///
    /// Safe to run concurrently: each row is counted by the call that removed it.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let cutoff = now_millis() - self.retention;
        let removed = self.store.delete_expired(cutoff).await?;
        if removed > 0 {
            info!(removed, "Expired notifications purged");
        }
        Ok(removed)
    }

    /// A principal's own and broadcast notifications, newest first.
    /// Expired entries in that audience are purged first.
    pub async fn list_for(&self, principal: &PrincipalId) -> Result<Vec<Notification>> {
        let cutoff = now_millis() - self.retention;
        let purged = self.store.delete_expired_for(principal, cutoff).await?;
        if purged > 0 {
            debug!(principal = %principal, purged, "Lazily purged expired notifications");
        }
        self.store.list_for(principal).await
    }

    /// Mark a notification read on behalf of its addressee
    pub async fn mark_read(&self, principal: &PrincipalId, id: NotificationId) -> Result<()> {
        let notification = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ConciergeError::NotFound(format!("notification {}", id)))?;

        match notification.audience {
            Audience::Broadcast => Err(ConciergeError::BadRequest(format!(
                "broadcast notification {} has no per-principal read state",
                id
            ))),
            Audience::Principal(ref addressee) if addressee != principal => {
                Err(ConciergeError::InsufficientPrivilege(format!(
                    "notification {} is not addressed to {}",
                    id, principal
                )))
            }
            Audience::Principal(_) => {
                if !self.store.mark_read(id).await? {
                    return Err(ConciergeError::NotFound(format!("notification {}", id)));
                }
                Ok(())
            }
        }
    }

    /// Staff broadcast of a `system` notice. Written before returning.
    pub async fn announce(
        &self,
        actor: &Principal,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Notification> {
        require(actor.role, Capability::AnnounceSystemNotice)?;
        let notification = Notification::new(
            Audience::Broadcast,
            title,
            body,
            NotificationKind::System,
            NotificationOrigin::Operator,
        );
        self.store.insert(notification.clone()).await?;
        self.hub.publish_notification(&notification);
        info!(actor = %actor.id, notification = %notification.id, "System notice announced");
        Ok(notification)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn worker_task(
    mut rx: mpsc::UnboundedReceiver<Job>,
    store: Arc<dyn NotificationStore>,
    hub: Arc<RealtimeHub>,
    counters: Arc<Counters>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Deliver(notification) => match store.insert(notification.clone()).await {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    let viewers = hub.publish_notification(&notification);
                    debug!(
                        notification = %notification.id,
                        audience = %notification.audience,
                        viewers,
                        "Notification delivered"
                    );
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        notification = %notification.id,
                        audience = %notification.audience,
                        error = %e,
                        "Failed to persist notification"
                    );
                }
            },
            Job::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Notification worker stopped");
}

/// Spawn a periodic retention sweep
pub fn spawn_cleanup_task(
    dispatcher: Arc<NotificationDispatcher>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match dispatcher.cleanup_expired().await {
                Ok(removed) if removed > 0 => {
                    debug!("Notification sweep: removed {} expired entries", removed)
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Notification sweep failed"),
            }
        }
    });
    info!(interval_secs = interval.as_secs(), "Notification cleanup task started");
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::MemoryNotificationStore;
    use crate::types::Result as ConciergeResult;
    use chrono::{DateTime, Utc};

    fn setup() -> (Arc<NotificationDispatcher>, Arc<MemoryNotificationStore>, Arc<RealtimeHub>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let hub = RealtimeHub::new(16);
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            hub.clone(),
            Duration::hours(DEFAULT_RETENTION_HOURS),
        );
        (dispatcher, store, hub)
    }

    fn aged(audience: Audience, kind: NotificationKind, hours: i64) -> Notification {
        let mut n = Notification::new(audience, "t", "b", kind, NotificationOrigin::Automated);
        n.created_at = now_millis() - Duration::hours(hours);
        n
    }

    #[tokio::test]
    async fn test_dispatch_persists_after_flush() {
        let (dispatcher, store, _) = setup();
        let id = dispatcher.dispatch(
            Audience::Principal("c1".into()),
            "Request received",
            "Queued",
            NotificationKind::Info,
        );
        dispatcher.flush().await;

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.origin, NotificationOrigin::Automated);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_subscribed_viewer() {
        let (dispatcher, _, hub) = setup();
        let mut sub = hub.subscribe("c1".into(), crate::realtime::Scope::Owner("c1".into()));
        dispatcher.dispatch(
            Audience::Principal("c1".into()),
            "Request ready",
            "Done",
            NotificationKind::Success,
        );
        dispatcher.flush().await;
        assert!(matches!(
            sub.try_recv(),
            Some(crate::realtime::RealtimeMessage::Notification(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (dispatcher, store, _) = setup();
        let old = aged(Audience::Principal("c1".into()), NotificationKind::Info, 73);
        let fresh = aged(Audience::Principal("c1".into()), NotificationKind::Info, 1);
        let system = aged(Audience::Broadcast, NotificationKind::System, 200);
        for n in [old, fresh, system] {
            store.insert(n).await.unwrap();
        }

        assert_eq!(dispatcher.cleanup_expired().await.unwrap(), 1);
        assert_eq!(dispatcher.cleanup_expired().await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_list_purges_lazily_and_includes_broadcasts() {
        let (dispatcher, store, _) = setup();
        store
            .insert(aged(Audience::Principal("c1".into()), NotificationKind::Error, 80))
            .await
            .unwrap();
        store
            .insert(aged(Audience::Principal("c2".into()), NotificationKind::Error, 80))
            .await
            .unwrap();
        let root = Principal::new("root", Role::Superuser, "Root");
        dispatcher
            .announce(&root, "Maintenance", "Tonight at 22:00")
            .await
            .unwrap();

        let listed = dispatcher.list_for(&"c1".into()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, NotificationKind::System);
        // c2's expired entry is untouched until c2 reads or a sweep runs
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_only_by_addressee() {
        let (dispatcher, store, _) = setup();
        let id = dispatcher.dispatch(
            Audience::Principal("c1".into()),
            "Request received",
            "Queued",
            NotificationKind::Info,
        );
        dispatcher.flush().await;

        let err = dispatcher.mark_read(&"c2".into(), id).await.unwrap_err();
        assert!(matches!(err, ConciergeError::InsufficientPrivilege(_)));

        dispatcher.mark_read(&"c1".into(), id).await.unwrap();
        assert!(store.get(id).await.unwrap().unwrap().read);

        let missing = dispatcher
            .mark_read(&"c1".into(), NotificationId::generate())
            .await;
        assert!(matches!(missing, Err(ConciergeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_client_cannot_announce() {
        let (dispatcher, _, _) = setup();
        let client = Principal::new("c1", Role::Client, "Client");
        let err = dispatcher.announce(&client, "x", "y").await.unwrap_err();
        assert!(matches!(err, ConciergeError::InsufficientPrivilege(_)));
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl NotificationStore for FailingStore {
        async fn insert(&self, _: Notification) -> ConciergeResult<()> {
            Err(ConciergeError::Database("unavailable".into()))
        }
        async fn get(&self, _: NotificationId) -> ConciergeResult<Option<Notification>> {
            Ok(None)
        }
        async fn list_for(&self, _: &PrincipalId) -> ConciergeResult<Vec<Notification>> {
            Ok(Vec::new())
        }
        async fn mark_read(&self, _: NotificationId) -> ConciergeResult<bool> {
            Ok(false)
        }
        async fn delete_expired(&self, _: DateTime<Utc>) -> ConciergeResult<usize> {
            Ok(0)
        }
        async fn delete_expired_for(
            &self,
            _: &PrincipalId,
            _: DateTime<Utc>,
        ) -> ConciergeResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_raised() {
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FailingStore),
            RealtimeHub::new(4),
            Duration::hours(DEFAULT_RETENTION_HOURS),
        );
        dispatcher.dispatch(Audience::Broadcast, "t", "b", NotificationKind::Info);
        dispatcher.flush().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
    }
}
