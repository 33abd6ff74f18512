//! Wiring of stores, engine, dispatcher and realtime hub

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::artifacts::BaseUrlResolver;
use crate::auth::{IdentityRegistry, RoleChangeGuard};
use crate::config::PlatformConfig;
use crate::db::{MongoClient, MongoNotificationStore, MongoPrincipalStore, MongoRequestStore};
use crate::engine::RequestService;
use crate::journal::EventJournal;
use crate::nats::{NatsBridge, NatsClient};
use crate::notify::{spawn_cleanup_task, NotificationDispatcher};
use crate::realtime::{spawn_change_pump, RealtimeHub};
use crate::store::{
    MemoryNotificationStore, MemoryPrincipalStore, MemoryRequestStore, NotificationStore,
    PrincipalStore, RequestStore,
};
use crate::types::Result;

/// A running instance: every component, sharing one hub and one change stream
pub struct Platform {
    pub config: PlatformConfig,
    pub registry: IdentityRegistry,
    pub requests: Arc<dyn RequestStore>,
    pub hub: Arc<RealtimeHub>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub journal: Arc<EventJournal>,
    pub service: RequestService,
    pub role_guard: Arc<RoleChangeGuard>,
    bridge: Option<Arc<NatsBridge>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Platform {
    /// In-memory backend. Must run inside a tokio runtime.
    pub fn in_memory(config: PlatformConfig) -> Self {
        let requests = Arc::new(MemoryRequestStore::with_capacity(config.change_capacity));
        Self::assemble(
            config,
            requests,
            Arc::new(MemoryNotificationStore::new()),
            Arc::new(MemoryPrincipalStore::new()),
        )
    }

    /// MongoDB backend
    pub async fn with_mongo(client: &MongoClient, config: PlatformConfig) -> Result<Self> {
        let requests = Arc::new(MongoRequestStore::new(client, config.change_capacity).await?);
        let notifications = Arc::new(MongoNotificationStore::new(client).await?);
        let principals = Arc::new(MongoPrincipalStore::new(client).await?);
        info!(db = client.db_name(), "Using MongoDB stores");
        Ok(Self::assemble(config, requests, notifications, principals))
    }

    fn assemble(
        config: PlatformConfig,
        requests: Arc<dyn RequestStore>,
        notifications: Arc<dyn NotificationStore>,
        principals: Arc<dyn PrincipalStore>,
    ) -> Self {
        let registry = IdentityRegistry::new(principals);
        let hub = RealtimeHub::new(config.change_capacity);
        let dispatcher =
            NotificationDispatcher::new(notifications, hub.clone(), config.notification_retention);
        let journal = Arc::new(EventJournal::new());
        let role_guard = Arc::new(RoleChangeGuard::new(
            registry.clone(),
            config.role_change_ttl,
        ));

        let service = RequestService::new(
            registry.clone(),
            requests.clone(),
            dispatcher.clone(),
            hub.clone(),
            journal.clone(),
            Arc::new(BaseUrlResolver::new(config.artifact_base_url.clone())),
        );

        let mut tasks = vec![spawn_change_pump(hub.clone(), requests.subscribe_changes())];

        if let Some(interval) = config.sweep_interval {
            tasks.push(spawn_cleanup_task(dispatcher.clone(), interval));

            let guard = role_guard.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let dropped = guard.sweep_expired();
                    if dropped > 0 {
                        debug!("Role change sweep: dropped {} expired tickets", dropped);
                    }
                }
            }));
        }

        info!(node = %config.node_id, "Platform assembled");

        Self {
            config,
            registry,
            requests,
            hub,
            dispatcher,
            journal,
            service,
            role_guard,
            bridge: None,
            tasks,
        }
    }

    /// Bridge this node's hub to other nodes over NATS
    pub async fn attach_bridge(&mut self, client: NatsClient) -> Result<()> {
        let bridge = Arc::new(NatsBridge::new(
            client,
            self.hub.clone(),
            self.config.node_id.clone(),
        ));
        let (inbound, outbound) = Arc::clone(&bridge).start().await?;
        self.tasks.push(inbound);
        self.tasks.push(outbound);
        self.bridge = Some(bridge);
        Ok(())
    }

    /// Stop background tasks. Queued notifications are flushed first.
    pub async fn shutdown(self) {
        self.dispatcher.flush().await;
        if let Some(ref bridge) = self.bridge {
            bridge.flush().await;
        }
        for task in self.tasks {
            task.abort();
        }
        info!(node = %self.config.node_id, "Platform stopped");
    }
}
