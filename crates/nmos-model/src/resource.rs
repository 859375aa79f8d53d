//! Resource types and IS-04 resource constructors.
//!
//! The constructors build the `data` JSON of each resource kind with the core
//! schema fields; they serve as the resources a typical node would hold rather
//! than an exhaustive rendering of every schema variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ModelError;
use crate::id::ResourceId;
use crate::version::{self, tai_now, ApiVersion};

/// The six IS-04 resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Node,
    Device,
    Source,
    Flow,
    Sender,
    Receiver,
}

impl ResourceType {
    /// The singular type name used in registration request bodies.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Node => "node",
            ResourceType::Device => "device",
            ResourceType::Source => "source",
            ResourceType::Flow => "flow",
            ResourceType::Sender => "sender",
            ResourceType::Receiver => "receiver",
        }
    }

    /// The plural name used in resource paths, e.g. `senders/<id>`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceType::Node => "nodes",
            ResourceType::Device => "devices",
            ResourceType::Source => "sources",
            ResourceType::Flow => "flows",
            ResourceType::Sender => "senders",
            ResourceType::Receiver => "receivers",
        }
    }

    /// Parses a plural path segment back to the resource type.
    pub fn from_path_segment(segment: &str) -> Result<Self, ModelError> {
        match segment {
            "nodes" => Ok(ResourceType::Node),
            "devices" => Ok(ResourceType::Device),
            "sources" => Ok(ResourceType::Source),
            "flows" => Ok(ResourceType::Flow),
            "senders" => Ok(ResourceType::Sender),
            "receivers" => Ok(ResourceType::Receiver),
            other => Err(ModelError::UnknownResourceType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A resource held by the node: its identity, type, native API version and
/// schema data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub version: ApiVersion,
    pub data: Value,
}

impl Resource {
    pub fn new(resource_type: ResourceType, data: Value) -> Self {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map(ResourceId::from)
            .unwrap_or_else(ResourceId::random);

        Resource {
            id,
            resource_type,
            version: version::V1_3,
            data,
        }
    }

    /// The resource path, `<type-plural>/<id>`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.resource_type.path_segment(), self.id)
    }
}

// The common fields shared by every resource schema.
fn make_resource_core(id: &ResourceId, label: &str) -> Value {
    json!({
        "id": id.to_string(),
        "version": tai_now(),
        "label": label,
        "description": label,
        "tags": {},
    })
}

fn merge(mut core: Value, extra: Value) -> Value {
    if let (Some(core_map), Some(extra_map)) = (core.as_object_mut(), extra.as_object()) {
        for (key, value) in extra_map {
            core_map.insert(key.clone(), value.clone());
        }
    }
    core
}

/// Builds a node (`/self`) resource.
///
/// `host_addresses` must contain at least the primary host address; the first
/// entry is used for the node's `href`.
pub fn make_node(
    id: &ResourceId,
    label: &str,
    api_proto: &str,
    host_addresses: &[String],
    port: u16,
) -> Resource {
    let primary = host_addresses.first().map(String::as_str).unwrap_or("127.0.0.1");

    let endpoints: Vec<Value> = host_addresses
        .iter()
        .map(|host| {
            json!({
                "host": host,
                "port": port,
                "protocol": api_proto,
            })
        })
        .collect();

    let data = merge(
        make_resource_core(id, label),
        json!({
            "href": format!("{}://{}:{}/", api_proto, primary, port),
            "hostname": null,
            "caps": {},
            "api": {
                "versions": version::SUPPORTED_VERSIONS,
                "endpoints": endpoints,
            },
            "services": [],
            "clocks": [],
            "interfaces": [],
        }),
    );

    Resource::new(ResourceType::Node, data)
}

/// Builds a generic device resource belonging to `node_id`.
pub fn make_device(
    id: &ResourceId,
    node_id: &ResourceId,
    label: &str,
    senders: &[ResourceId],
    receivers: &[ResourceId],
) -> Resource {
    let data = merge(
        make_resource_core(id, label),
        json!({
            "type": "urn:x-nmos:device:generic",
            "node_id": node_id.to_string(),
            "senders": senders,
            "receivers": receivers,
            "controls": [],
        }),
    );

    Resource::new(ResourceType::Device, data)
}

/// Builds a source resource belonging to `device_id`.
pub fn make_source(id: &ResourceId, device_id: &ResourceId, label: &str, format: &str) -> Resource {
    let data = merge(
        make_resource_core(id, label),
        json!({
            "caps": {},
            "device_id": device_id.to_string(),
            "parents": [],
            "clock_name": null,
            "format": format,
        }),
    );

    Resource::new(ResourceType::Source, data)
}

/// Builds a flow resource for `source_id` on `device_id`.
pub fn make_flow(
    id: &ResourceId,
    source_id: &ResourceId,
    device_id: &ResourceId,
    label: &str,
    format: &str,
    media_type: &str,
) -> Resource {
    let data = merge(
        make_resource_core(id, label),
        json!({
            "source_id": source_id.to_string(),
            "device_id": device_id.to_string(),
            "parents": [],
            "format": format,
            "media_type": media_type,
        }),
    );

    Resource::new(ResourceType::Flow, data)
}

/// Builds a sender resource transmitting `flow_id`.
pub fn make_sender(
    id: &ResourceId,
    flow_id: &ResourceId,
    device_id: &ResourceId,
    label: &str,
    manifest_href: &str,
    interface_bindings: &[String],
) -> Resource {
    let data = merge(
        make_resource_core(id, label),
        json!({
            "flow_id": flow_id.to_string(),
            "device_id": device_id.to_string(),
            "transport": "urn:x-nmos:transport:rtp.mcast",
            "manifest_href": manifest_href,
            "interface_bindings": interface_bindings,
            "subscription": { "receiver_id": null, "active": false },
        }),
    );

    Resource::new(ResourceType::Sender, data)
}

/// Builds a receiver resource on `device_id` accepting `format` media.
pub fn make_receiver(
    id: &ResourceId,
    device_id: &ResourceId,
    label: &str,
    format: &str,
    media_types: &[String],
) -> Resource {
    let data = merge(
        make_resource_core(id, label),
        json!({
            "device_id": device_id.to_string(),
            "transport": "urn:x-nmos:transport:rtp.mcast",
            "format": format,
            "caps": { "media_types": media_types },
            "interface_bindings": [],
            "subscription": { "sender_id": null, "active": false },
        }),
    );

    Resource::new(ResourceType::Receiver, data)
}
