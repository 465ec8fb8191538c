//! Runtime Errors

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Transport Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors reported by a [`crate::Transport`] implementation
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out after {timeout:?} on '{subject}'")]
    Timeout { subject: String, timeout: Duration },

    #[error("No responders on '{subject}'")]
    NoResponders { subject: String },

    #[error("Publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Transport closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the plugin runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Transport unavailable; fatal at startup
    #[error("Connection error: {0}")]
    Connection(String),

    /// Announcement handshake timed out or was rejected; fatal at startup
    #[error("Registration failed: {0}")]
    Registration(String),

    /// Settings update rejected by the update hook
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Handler failure, contained by the router
    #[error("Operation '{method}' failed: {reason}")]
    Dispatch { method: String, reason: String },

    /// Outbound publish failed
    #[error("Publish failed: {0}")]
    Publish(#[source] TransportError),

    /// Settings store failed to load or save
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Process configuration or plugin definition is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type for plugin runtime operations
pub type PluginResult<T> = Result<T, PluginError>;

impl From<TransportError> for PluginError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(reason) => PluginError::Connection(reason),
            other => PluginError::Publish(other),
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::Codec(err.to_string())
    }
}

impl PluginError {
    /// Whether this error should stop the process when it happens at startup
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            PluginError::Connection(_) | PluginError::Registration(_) | PluginError::Config(_)
        )
    }
}
