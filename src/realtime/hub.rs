//! Realtime hub - server-side fan-out of changes to connected viewers
//!
//! Every live subscription has a scope. A pump task consumes the request
//! store's change stream and hands each event to the subscriptions whose
//! scope covers the record's owner. Notifications go to their addressee,
//! broadcasts to everyone.
//!
//! Delivery is at-least-once and unordered across records; viewers merge by
//! `updated_at` (see [`super::viewer`]). When the pump falls behind the
//! change stream every viewer is told to resync rather than silently
//! missing deltas. Each viewer's queue is bounded the same way: a viewer
//! that stops draining loses further deltas and gets a resync instead.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{ChangeEvent, Notification, PrincipalId};

/// What a subscription is entitled to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Records owned by one principal
    Owner(PrincipalId),
    /// A partner's view: records of managed owners or created by the partner
    Managed {
        partner: PrincipalId,
        owners: HashSet<PrincipalId>,
    },
    /// Staff view of every record
    AllRecords,
}

impl Scope {
    pub fn covers(&self, event: &ChangeEvent) -> bool {
        match self {
            Scope::Owner(owner) => &event.owner_id == owner,
            Scope::Managed { partner, owners } => {
                &event.created_by == partner
                    || &event.owner_id == partner
                    || owners.contains(&event.owner_id)
            }
            Scope::AllRecords => true,
        }
    }
}

/// Message pushed to a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeMessage {
    Change(ChangeEvent),
    Notification(Notification),
    /// Deltas were lost; re-fetch full state
    Resync,
}

struct SubscriberEntry {
    viewer: PrincipalId,
    scope: Scope,
    tx: mpsc::Sender<RealtimeMessage>,
    /// Set when a message was dropped on a full queue
    overflowed: Arc<AtomicBool>,
}

/// Hub statistics
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub subscribers: usize,
    pub delivered: u64,
    pub pruned: u64,
    pub dropped: u64,
}

/// Scope-based fan-out of changes and notifications
pub struct RealtimeHub {
    subscribers: DashMap<u64, SubscriberEntry>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
    dropped: AtomicU64,
    /// Per-viewer queue bound
    viewer_capacity: usize,
    /// Locally originated messages, for bridges to other nodes
    outbound: broadcast::Sender<RealtimeMessage>,
}

impl RealtimeHub {
    /// `capacity` bounds both the outbound stream and every viewer's queue
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (outbound, _) = broadcast::channel(capacity);
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            viewer_capacity: capacity,
            outbound,
        })
    }

    /// Register a viewer. Entitlement to `scope` is checked by the caller.
    pub fn subscribe(self: &Arc<Self>, viewer: PrincipalId, scope: Scope) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.viewer_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        debug!(subscription = id, viewer = %viewer, scope = ?scope, "Viewer subscribed");
        self.subscribers.insert(
            id,
            SubscriberEntry {
                viewer: viewer.clone(),
                scope,
                tx,
                overflowed: Arc::clone(&overflowed),
            },
        );
        Subscription {
            id,
            viewer,
            rx,
            overflowed,
            hub: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Viewer unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.subscribers.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Receiver of every locally originated message
    pub fn outbound(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.outbound.subscribe()
    }

    /// Deliver a local change and expose it to bridges
    pub fn publish_change(&self, event: &ChangeEvent) -> usize {
        let _ = self.outbound.send(RealtimeMessage::Change(event.clone()));
        self.deliver_change(event)
    }

    /// Deliver a local notification and expose it to bridges
    pub fn publish_notification(&self, notification: &Notification) -> usize {
        let _ = self
            .outbound
            .send(RealtimeMessage::Notification(notification.clone()));
        self.deliver_notification(notification)
    }

    /// Deliver a message that originated on another node (never re-exported)
    pub fn deliver_remote(&self, message: RealtimeMessage) -> usize {
        match message {
            RealtimeMessage::Change(event) => self.deliver_change(&event),
            RealtimeMessage::Notification(n) => self.deliver_notification(&n),
            RealtimeMessage::Resync => self.broadcast_resync(),
        }
    }

    /// Tell every viewer to re-fetch full state
    pub fn broadcast_resync(&self) -> usize {
        self.deliver_where(|_| true, RealtimeMessage::Resync)
    }

    fn deliver_change(&self, event: &ChangeEvent) -> usize {
        self.deliver_where(
            |entry| entry.scope.covers(event),
            RealtimeMessage::Change(event.clone()),
        )
    }

    fn deliver_notification(&self, notification: &Notification) -> usize {
        self.deliver_where(
            |entry| notification.audience.includes(&entry.viewer),
            RealtimeMessage::Notification(notification.clone()),
        )
    }

    fn deliver_where<F>(&self, matches: F, message: RealtimeMessage) -> usize
    where
        F: Fn(&SubscriberEntry) -> bool,
    {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            if !matches(entry.value()) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if !entry.overflowed.swap(true, Ordering::AcqRel) {
                        warn!(subscription = *entry.key(), viewer = %entry.viewer, "Viewer queue full, it will resync");
                    }
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Prune after iterating; removing while holding a shard guard deadlocks
        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                self.pruned.fetch_add(1, Ordering::Relaxed);
                debug!(subscription = id, "Pruned closed viewer");
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

/// A live viewer registration; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    viewer: PrincipalId,
    rx: mpsc::Receiver<RealtimeMessage>,
    overflowed: Arc<AtomicBool>,
    hub: Weak<RealtimeHub>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn viewer(&self) -> &PrincipalId {
        &self.viewer
    }

    /// Next message, or `None` once the hub is gone. After an overflow the
    /// queued messages come first, then a single `Resync`.
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        if let Some(message) = self.try_recv() {
            return Some(message);
        }
        self.rx.recv().await
    }

    /// Non-blocking receive of an already queued message
    pub fn try_recv(&mut self) -> Option<RealtimeMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(_) if self.overflowed.swap(false, Ordering::AcqRel) => {
                Some(RealtimeMessage::Resync)
            }
            Err(_) => None,
        }
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<RealtimeMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("viewer", &self.viewer)
            .finish()
    }
}

/// Spawn the pump feeding store changes into the hub
pub fn spawn_change_pump(
    hub: Arc<RealtimeHub>,
    mut changes: broadcast::Receiver<ChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Realtime change pump started");
        loop {
            match changes.recv().await {
                Ok(event) => {
                    let delivered = hub.publish_change(&event);
                    debug!(
                        request_id = %event.record_id,
                        status = %event.new_status,
                        delivered,
                        "Change fanned out"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Change pump lagged, asking viewers to resync");
                    hub.broadcast_resync();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Change stream closed, realtime pump stopping");
                    break;
                }
            }
        }
    })
}
