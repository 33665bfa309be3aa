//! Error types for the tracking coordinator.
//!
//! The variants mirror how each failure is handled: permission problems are
//! surfaced and never retried, service errors are surfaced and retryable,
//! persistence and network errors are logged and absorbed by the caller.

use shift_tracker_protocol::ErrorInfo;
use std::path::PathBuf;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    // ─────────────────────────────────────────────────────────────────────
    // Sampler Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Location permission denied: {permission}")]
    PermissionDenied { permission: String },

    #[error("Sampler service error: {0}")]
    Service(String),

    #[error("Invalid sampler event: {0}")]
    InvalidEvent(ErrorInfo),

    #[error("Start cancelled: {0}")]
    StartCancelled(String),

    // ─────────────────────────────────────────────────────────────────────
    // Infrastructure Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid tracking configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Tracking coordinator is no longer running")]
    CoordinatorClosed,
}

impl TrackerError {
    pub fn is_permission(&self) -> bool {
        matches!(self, TrackerError::PermissionDenied { .. })
    }

    /// Whether an explicit user action may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::Service(_) | TrackerError::Network(_) | TrackerError::Persistence(_)
        )
    }

    /// Message suitable for the session's `error_message` field.
    pub fn user_message(&self) -> String {
        match self {
            TrackerError::PermissionDenied { permission } => {
                format!("Location permission required: {}", permission)
            }
            TrackerError::Service(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ErrorInfo> for TrackerError {
    fn from(info: ErrorInfo) -> Self {
        TrackerError::InvalidEvent(info)
    }
}

/// Convenience type alias for Results using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;
