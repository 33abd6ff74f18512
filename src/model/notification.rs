//! Notifications addressed to principals or broadcast to everyone

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::principal::PrincipalId;
use crate::types::ConciergeError;

/// Notification identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for NotificationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
    System,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::System => "system",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = ConciergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(NotificationKind::Info),
            "success" => Ok(NotificationKind::Success),
            "error" => Ok(NotificationKind::Error),
            "system" => Ok(NotificationKind::System),
            other => Err(ConciergeError::Database(format!(
                "Unrecognised notification kind '{}'",
                other
            ))),
        }
    }
}

/// Who produced the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationOrigin {
    /// Machine-generated as a transition side effect
    Automated,
    /// Sent explicitly by staff
    Operator,
}

impl NotificationOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationOrigin::Automated => "automated",
            NotificationOrigin::Operator => "operator",
        }
    }
}

impl FromStr for NotificationOrigin {
    type Err = ConciergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automated" => Ok(NotificationOrigin::Automated),
            "operator" => Ok(NotificationOrigin::Operator),
            other => Err(ConciergeError::Database(format!(
                "Unrecognised notification origin '{}'",
                other
            ))),
        }
    }
}

/// Recipient of a notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Audience {
    Principal(PrincipalId),
    Broadcast,
}

impl Audience {
    /// Whether a principal sees notifications sent to this audience
    pub fn includes(&self, principal: &PrincipalId) -> bool {
        match self {
            Audience::Principal(id) => id == principal,
            Audience::Broadcast => true,
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Principal(id) => write!(f, "{}", id),
            Audience::Broadcast => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub audience: Audience,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub origin: NotificationOrigin,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        audience: Audience,
        title: impl Into<String>,
        body: impl Into<String>,
        kind: NotificationKind,
        origin: NotificationOrigin,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            audience,
            title: title.into(),
            body: body.into(),
            kind,
            origin,
            read: false,
            created_at: super::request::now_millis(),
        }
    }

    /// Automated, non-system entries are subject to the retention window
    pub fn is_retention_scoped(&self) -> bool {
        self.origin == NotificationOrigin::Automated && self.kind != NotificationKind::System
    }

    /// Retention-scoped and created before `cutoff` (now minus the window)
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_retention_scoped() && self.created_at < cutoff
    }
}
