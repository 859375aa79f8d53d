//! Node behaviour error types.

use thiserror::Error;

/// Result type alias for node behaviour operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Node behaviour error type.
///
/// No error here is fatal to the agent: registry-side failures resolve to
/// retrying on another registry, consuming the event, or switching modes.
#[derive(Debug, Error)]
pub enum NodeError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid node configuration.
    #[error("Invalid node configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// Invalid registry or advertisement URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Failed to reach the registry at all.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The registry did not respond within the request timeout.
    #[error("Request timeout")]
    Timeout,

    /// The registry answered with a server-side (5xx) error.
    #[error("Registration service error: {status}")]
    ServiceError { status: u16 },

    // =========================================================================
    // Advertisement Errors
    // =========================================================================
    /// Failed to publish or update the node's service advertisement.
    #[error("Advertisement failed: {0}")]
    AdvertiseFailed(String),

    /// A received discovery answer could not be parsed.
    #[error("Invalid discovery answer: {0}")]
    InvalidAnswer(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Resource model error.
    #[error("Model error: {0}")]
    Model(#[from] nmos_model::ModelError),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for NodeError {
    fn from(err: url::ParseError) -> Self {
        NodeError::InvalidUri(err.to_string())
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NodeError::Timeout
        } else {
            NodeError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::ConnectionFailed(err.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(err: toml::de::Error) -> Self {
        NodeError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for NodeError {
    fn from(err: toml::ser::Error) -> Self {
        NodeError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl NodeError {
    /// Returns true for the failures that make the currently selected
    /// registry unusable: 5xx responses, connection failures and timeouts.
    ///
    /// The state machine pops the registry and proceeds with the next.
    pub fn is_registry_service_error(&self) -> bool {
        matches!(
            self,
            NodeError::ServiceError { .. } | NodeError::ConnectionFailed(_) | NodeError::Timeout
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::ConfigLoadFailed(_)
                | NodeError::ConfigSaveFailed(_)
        )
    }
}
