//! Notification document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Audience, Notification, NotificationId, NotificationKind, PrincipalId};
use crate::types::{ConciergeError, Result};

pub const NOTIFICATION_COLLECTION: &str = "notifications";

/// Notification stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    /// Notification uuid as a string
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Addressee; absent for broadcasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(default)]
    pub broadcast: bool,

    pub title: String,
    pub body: String,
    pub kind: String,
    pub origin: String,

    #[serde(default)]
    pub read: bool,

    pub created_at: DateTime,
}

impl NotificationDoc {
    pub fn into_notification(self) -> Result<Notification> {
        let id = Uuid::parse_str(&self._id)
            .map_err(|e| ConciergeError::Database(format!("Bad notification id '{}': {}", self._id, e)))?;
        let audience = match (self.broadcast, self.recipient) {
            (true, _) => Audience::Broadcast,
            (false, Some(recipient)) => Audience::Principal(PrincipalId::new(recipient)),
            (false, None) => {
                return Err(ConciergeError::Database(format!(
                    "notification {} has no audience",
                    self._id
                )))
            }
        };
        Ok(Notification {
            id: NotificationId::from(id),
            audience,
            title: self.title,
            body: self.body,
            kind: self.kind.parse()?,
            origin: self.origin.parse()?,
            read: self.read,
            created_at: self.created_at.to_chrono(),
        })
    }

    /// Filter for what `principal` can see: addressed to them, or broadcast
    pub fn audience_filter(principal: &PrincipalId) -> Document {
        doc! {
            "$or": [
                { "recipient": principal.as_str() },
                { "broadcast": true },
            ]
        }
    }

    /// Filter for retention-scoped entries created before `cutoff`
    pub fn expired_filter(cutoff: chrono::DateTime<chrono::Utc>) -> Document {
        doc! {
            "origin": "automated",
            "kind": { "$ne": NotificationKind::System.as_str() },
            "created_at": { "$lt": DateTime::from_chrono(cutoff) },
        }
    }
}

impl From<&Notification> for NotificationDoc {
    fn from(n: &Notification) -> Self {
        let (recipient, broadcast) = match &n.audience {
            Audience::Principal(id) => (Some(id.as_str().to_string()), false),
            Audience::Broadcast => (None, true),
        };
        Self {
            _id: n.id.to_string(),
            metadata: Metadata::new(),
            recipient,
            broadcast,
            title: n.title.clone(),
            body: n.body.clone(),
            kind: n.kind.as_str().to_string(),
            origin: n.origin.as_str().to_string(),
            read: n.read,
            created_at: DateTime::from_chrono(n.created_at),
        }
    }
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "recipient": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("recipient_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "origin": 1, "kind": 1, "created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("retention_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
