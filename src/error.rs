use thiserror::Error;

/// Custom error types for the lab monitor server
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Registry errors
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// Signaling errors
    #[error("No kiosk registered for session {0}")]
    KioskUnavailable(String),

    #[error("No route for session {0}")]
    RouteNotFound(String),

    #[error("Invalid signaling payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Connection errors
    #[error("Connection {0} is closed")]
    ConnectionClosed(String),

    /// Persistence-backed registry only; the in-memory registry never
    /// produces this variant
    #[error("Session storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        MonitorError::Internal(msg.into())
    }

    /// Helper to create InvalidPayload errors
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        MonitorError::InvalidPayload(msg.into())
    }

    /// Non-fatal signaling conditions: the triggering message is dropped
    /// and the connection stays open
    pub fn is_signaling(&self) -> bool {
        matches!(
            self,
            MonitorError::KioskUnavailable(_) | MonitorError::RouteNotFound(_)
        )
    }
}
