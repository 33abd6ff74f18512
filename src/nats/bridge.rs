//! Cross-node realtime bridge
//!
//! Every node runs its own [`RealtimeHub`]. The bridge publishes locally
//! originated changes and notifications to NATS and feeds messages from
//! other nodes into the local hub, so a viewer connected anywhere sees every
//! write. Envelopes carry the origin node id; a node drops its own echoes.
//!
//! Subjects:
//! - `concierge.changes.<owner>`: record changes, by owner
//! - `concierge.notices`: notifications

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::NatsClient;
use crate::realtime::{RealtimeHub, RealtimeMessage};
use crate::types::Result;

pub const SUBJECT_PREFIX: &str = "concierge";
pub const NOTICES_SUBJECT: &str = "concierge.notices";

/// Wire envelope for bridged messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEnvelope {
    pub origin_node: String,
    pub message: RealtimeMessage,
}

impl BridgeEnvelope {
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Subject token for a principal id; NATS reserves `.`, `*`, `>` and whitespace
fn subject_token(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Subject a message is published on. Resync is node-local and never bridged.
pub fn subject_for(message: &RealtimeMessage) -> Option<String> {
    match message {
        RealtimeMessage::Change(event) => Some(format!(
            "{}.changes.{}",
            SUBJECT_PREFIX,
            subject_token(event.owner_id.as_str())
        )),
        RealtimeMessage::Notification(_) => Some(NOTICES_SUBJECT.to_string()),
        RealtimeMessage::Resync => None,
    }
}

pub struct NatsBridge {
    client: NatsClient,
    hub: Arc<RealtimeHub>,
    node_id: String,
}

impl NatsBridge {
    pub fn new(client: NatsClient, hub: Arc<RealtimeHub>, node_id: impl Into<String>) -> Self {
        Self {
            client,
            hub,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether an inbound envelope should reach local viewers
    pub fn accepts(&self, envelope: &BridgeEnvelope) -> bool {
        envelope.origin_node != self.node_id
    }

    /// Subscribe to other nodes and start forwarding local traffic.
    /// Returns the inbound and outbound task handles.
    pub async fn start(self: Arc<Self>) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
        let mut subscriber = self
            .client
            .subscribe(&format!("{}.>", SUBJECT_PREFIX))
            .await?;
        info!(
            node = %self.node_id,
            client = self.client.name(),
            "Realtime bridge listening on {}.>",
            SUBJECT_PREFIX
        );

        let inbound = {
            let bridge = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(msg) = subscriber.next().await {
                    match BridgeEnvelope::decode(&msg.payload) {
                        Ok(envelope) if bridge.accepts(&envelope) => {
                            let delivered = bridge.hub.deliver_remote(envelope.message);
                            debug!(
                                subject = %msg.subject,
                                origin = %envelope.origin_node,
                                delivered,
                                "Bridged remote message"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(subject = %msg.subject, error = %e, "Failed to parse bridged message"),
                    }
                }
                warn!("Realtime bridge subscription ended");
            })
        };

        let outbound = {
            let bridge = Arc::clone(&self);
            let mut rx = self.hub.outbound();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => bridge.forward(message).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Remote viewers merge by updated_at; lost deltas are
                            // recovered on their next resync
                            warn!(skipped, "Realtime bridge lagged behind local hub");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                debug!("Realtime bridge outbound loop stopped");
            })
        };

        Ok((inbound, outbound))
    }

    /// Push out buffered publishes
    pub async fn flush(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush realtime bridge");
        }
    }

    async fn forward(&self, message: RealtimeMessage) {
        let Some(subject) = subject_for(&message) else {
            return;
        };
        let envelope = BridgeEnvelope {
            origin_node: self.node_id.clone(),
            message,
        };
        let payload = match envelope.encode() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to encode bridged message");
                return;
            }
        };
        if let Err(e) = self.client.publish(&subject, payload).await {
            warn!(subject = %subject, error = %e, "Failed to publish to NATS");
        }
    }
}
