//! Model error types.

use thiserror::Error;

use crate::id::ResourceId;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by the resource model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A resource with this id is already held by the store.
    #[error("Resource already exists: {0}")]
    DuplicateResource(ResourceId),

    /// No resource with this id is held by the store.
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    /// An API version string did not parse as `v<major>.<minor>`.
    #[error("Invalid API version: {0}")]
    InvalidVersion(String),

    /// An event path did not parse as `<resource-type-plural>/<id>`.
    #[error("Invalid event path: {0}")]
    InvalidEventPath(String),

    /// An unknown resource type name.
    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),
}
