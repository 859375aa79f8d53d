//! The mutable resource store.
//!
//! An insertion-ordered collection of the node's resources. Every mutation
//! emits a [`ResourceEvent`] into the store's [`EventGrain`] so the node
//! behaviour agent can propagate it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::event::ResourceEvent;
use crate::grain::EventGrain;
use crate::id::ResourceId;
use crate::resource::Resource;

/// Shared handle to the node's resources and their change-event grain.
#[derive(Clone)]
pub struct NodeStore {
    resources: Arc<RwLock<Vec<Resource>>>,
    grain: EventGrain,
}

impl NodeStore {
    pub fn new() -> Self {
        NodeStore {
            resources: Arc::new(RwLock::new(Vec::new())),
            grain: EventGrain::new(),
        }
    }

    /// The change-event grain fed by this store.
    pub fn grain(&self) -> &EventGrain {
        &self.grain
    }

    /// Inserts a resource, emitting an `added` event.
    pub async fn insert(&self, resource: Resource) -> ModelResult<()> {
        let mut resources = self.resources.write().await;
        if resources.iter().any(|held| held.id == resource.id) {
            return Err(ModelError::DuplicateResource(resource.id));
        }

        debug!(path = %resource.path(), "Resource added");
        let event = ResourceEvent::added(&resource);
        resources.push(resource);
        drop(resources);

        self.grain.push(event).await;
        Ok(())
    }

    /// Modifies a resource's data in place, emitting a `modified` event.
    pub async fn modify<F>(&self, id: &ResourceId, mutate: F) -> ModelResult<()>
    where
        F: FnOnce(&mut Value),
    {
        let mut resources = self.resources.write().await;
        let resource = resources
            .iter_mut()
            .find(|held| &held.id == id)
            .ok_or_else(|| ModelError::NotFound(id.clone()))?;

        let pre = resource.data.clone();
        mutate(&mut resource.data);

        debug!(path = %resource.path(), "Resource modified");
        let event = ResourceEvent::modified(resource, pre);
        drop(resources);

        self.grain.push(event).await;
        Ok(())
    }

    /// Removes a resource, emitting a `removed` event.
    pub async fn remove(&self, id: &ResourceId) -> ModelResult<()> {
        let mut resources = self.resources.write().await;
        let position = resources
            .iter()
            .position(|held| &held.id == id)
            .ok_or_else(|| ModelError::NotFound(id.clone()))?;

        let resource = resources.remove(position);
        debug!(path = %resource.path(), "Resource removed");
        let event = ResourceEvent::removed(&resource);
        drop(resources);

        self.grain.push(event).await;
        Ok(())
    }

    /// Resets the grain to one `sync` event per held resource, in insertion
    /// order, discarding whatever was pending.
    ///
    /// Called when the agent first interacts with a registry; the snapshot
    /// makes the registry consistent with the node regardless of what had
    /// already been queued.
    pub async fn resync(&self) {
        let resources = self.resources.read().await;
        let snapshot: Vec<ResourceEvent> = resources.iter().map(ResourceEvent::sync).collect();
        drop(resources);

        debug!(events = snapshot.len(), "Grain reset to sync snapshot");
        self.grain.replace(snapshot).await;
    }

    /// Returns a copy of the resource with the given id, if held.
    pub async fn get(&self, id: &ResourceId) -> Option<Resource> {
        self.resources
            .read()
            .await
            .iter()
            .find(|held| &held.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
