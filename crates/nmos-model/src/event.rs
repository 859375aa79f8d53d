//! Resource change events.
//!
//! Every mutation of the store produces one event addressed to the node
//! behaviour agent. A `sync` event is a creation event emitted for each held
//! resource when the agent first interacts with a registry, so the registry
//! becomes consistent with the node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};
use crate::id::ResourceId;
use crate::resource::{Resource, ResourceType};

/// The kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    Modified,
    Removed,
    Sync,
}

impl EventKind {
    /// Creation events call for registration creation (POST expecting 201).
    pub fn is_creation(&self) -> bool {
        matches!(self, EventKind::Added | EventKind::Sync)
    }
}

/// A single resource change event.
///
/// `pre` and `post` carry the resource payload before and after the change:
/// both for `modified`, only `post` for `added`/`sync`, only `pre` for
/// `removed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// `<resource-type-plural>/<id>`, e.g. `senders/<uuid>`.
    pub path: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Value>,
}

impl ResourceEvent {
    pub fn added(resource: &Resource) -> Self {
        ResourceEvent {
            path: resource.path(),
            kind: EventKind::Added,
            pre: None,
            post: Some(resource.data.clone()),
        }
    }

    pub fn modified(resource: &Resource, pre: Value) -> Self {
        ResourceEvent {
            path: resource.path(),
            kind: EventKind::Modified,
            pre: Some(pre),
            post: Some(resource.data.clone()),
        }
    }

    pub fn removed(resource: &Resource) -> Self {
        ResourceEvent {
            path: resource.path(),
            kind: EventKind::Removed,
            pre: Some(resource.data.clone()),
            post: None,
        }
    }

    pub fn sync(resource: &Resource) -> Self {
        ResourceEvent {
            path: resource.path(),
            kind: EventKind::Sync,
            pre: None,
            post: Some(resource.data.clone()),
        }
    }

    /// Splits the event path into the resource id and type.
    pub fn id_and_type(&self) -> ModelResult<(ResourceId, ResourceType)> {
        let (segment, id) = self
            .path
            .split_once('/')
            .ok_or_else(|| ModelError::InvalidEventPath(self.path.clone()))?;

        Ok((ResourceId::from(id), ResourceType::from_path_segment(segment)?))
    }
}
