//! Error taxonomy shared across Cadence crates.

use thiserror::Error;

/// Errors surfaced by the scheduling core.
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Bad or missing binding, invalid date combination, malformed window.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown applet, event, respondent schedule or link key.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The acting user lacks the role required for the operation.
    #[error("Permission denied: {0}")]
    NoPermission(String),

    /// No acting user could be determined.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Store constraint violation (foreign key, unique, not-null).
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Push transport failure. Never propagated to API callers.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CadenceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn no_permission(msg: impl Into<String>) -> Self {
        Self::NoPermission(msg.into())
    }

    /// True for errors a batch import may skip over and continue.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Integrity(_) | Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = CadenceError::validation("activity_id or flow_id is required");
        assert_eq!(
            e.to_string(),
            "Validation error: activity_id or flow_id is required"
        );
        assert_eq!(
            CadenceError::not_found("event 7").to_string(),
            "Not found: event 7"
        );
    }

    #[test]
    fn test_skippable() {
        assert!(CadenceError::Integrity("FOREIGN KEY constraint failed".into()).is_skippable());
        assert!(CadenceError::validation("bad").is_skippable());
        assert!(!CadenceError::Database("disk I/O error".into()).is_skippable());
        assert!(!CadenceError::not_found("x").is_skippable());
    }
}
