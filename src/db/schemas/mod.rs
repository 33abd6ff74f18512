//! MongoDB document schemas for requests, notifications and principals

mod metadata;
mod notification;
mod principal;
mod request;

pub use metadata::Metadata;
pub use notification::{NotificationDoc, NOTIFICATION_COLLECTION};
pub use principal::{PrincipalDoc, PRINCIPAL_COLLECTION};
pub use request::{RequestDoc, REQUEST_COLLECTION};
