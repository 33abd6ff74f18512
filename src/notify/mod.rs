//! Notification side effects of the request lifecycle

pub mod dispatcher;
pub mod templates;

pub use dispatcher::{
    spawn_cleanup_task, DispatchStats, NotificationDispatcher, DEFAULT_RETENTION_HOURS,
};
pub use templates::Notice;
