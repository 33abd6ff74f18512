//! Error types for Concierge
//!
//! One flat enum with string payloads, plus `From` conversions for the
//! infrastructure crates.

/// Main error type for Concierge operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConciergeError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Missing reason: {0}")]
    MissingReason(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Self-target forbidden: {0}")]
    SelfTargetForbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("Confirmation mismatch: {0}")]
    ConfirmationMismatch(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConciergeError {
    /// Only optimistic-concurrency losses may be retried without changing input.
    /// The caller must re-read the record first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable machine-readable code, used in logs and on the NATS wire
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownRole(_) => "UNKNOWN_ROLE",
            Self::InsufficientPrivilege(_) => "INSUFFICIENT_PRIVILEGE",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::MissingReason(_) => "MISSING_REASON",
            Self::Conflict(_) => "CONFLICT",
            Self::SelfTargetForbidden(_) => "SELF_TARGET_FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            Self::ConfirmationMismatch(_) => "CONFIRMATION_MISMATCH",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) => "DATABASE",
            Self::Nats(_) => "NATS",
            Self::Config(_) => "CONFIG",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

// Implement From conversions for common error types

impl From<serde_json::Error> for ConciergeError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for ConciergeError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for ConciergeError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode failed: {}", err))
    }
}

impl From<async_nats::Error> for ConciergeError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for Concierge operations
pub type Result<T> = std::result::Result<T, ConciergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(ConciergeError::Conflict("claimed".into()).is_retryable());
        assert!(!ConciergeError::MissingReason("empty".into()).is_retryable());
        assert!(!ConciergeError::InsufficientPrivilege("client".into()).is_retryable());
        assert!(!ConciergeError::NotFound("r1".into()).is_retryable());
    }

    #[test]
    fn test_display_keeps_specific_reason() {
        let err = ConciergeError::InvalidTransition("cannot cancel from processing".into());
        assert_eq!(err.to_string(), "Invalid transition: cannot cancel from processing");
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }
}
