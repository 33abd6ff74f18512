//! Domain records shared by the store, engine and realtime layers

pub mod event;
pub mod notification;
pub mod principal;
pub mod request;

pub use event::{ChangeEvent, ChangeKind, TransitionRecord};
pub use notification::{
    Audience, Notification, NotificationId, NotificationKind, NotificationOrigin,
};
pub use principal::{Principal, PrincipalId};
pub use request::{
    next_update_stamp, now_millis, NewServiceRequest, PatchField, RequestId, RequestPatch,
    RequestStatus, ServiceRequest,
};
