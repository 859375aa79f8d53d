//! API version downgrade of resource data.
//!
//! A registry may expose a lower API version than the node's native resource
//! version. Before a resource is marshalled into a registration request its
//! data is downgraded to the registry version by stripping the fields that
//! version does not know about.

use serde_json::Value;

use crate::resource::ResourceType;
use crate::version::{ApiVersion, V1_1, V1_2, V1_3};

// Fields introduced after v1.0, per resource type.
fn fields_added_in(resource_type: ResourceType) -> &'static [(ApiVersion, &'static str)] {
    match resource_type {
        ResourceType::Node => &[
            (V1_1, "api"),
            (V1_1, "clocks"),
            (V1_1, "description"),
            (V1_1, "tags"),
            (V1_2, "interfaces"),
        ],
        ResourceType::Device => &[
            (V1_1, "controls"),
            (V1_1, "description"),
            (V1_1, "tags"),
        ],
        ResourceType::Source => &[
            (V1_1, "clock_name"),
            (V1_1, "grain_rate"),
            (V1_1, "channels"),
        ],
        ResourceType::Flow => &[
            (V1_1, "device_id"),
            (V1_1, "media_type"),
            (V1_1, "sample_rate"),
            (V1_1, "grain_rate"),
            (V1_3, "event_type"),
        ],
        ResourceType::Sender => &[
            (V1_2, "caps"),
            (V1_2, "interface_bindings"),
            (V1_2, "subscription"),
        ],
        ResourceType::Receiver => &[
            (V1_2, "interface_bindings"),
            (V1_3, "event_types"),
        ],
    }
}

/// Returns a copy of `data` downgraded to `target`.
///
/// Fields introduced after the target version are removed; everything else is
/// passed through untouched. Downgrading to the native version (or higher) is
/// the identity.
pub fn downgrade(resource_type: ResourceType, data: &Value, target: ApiVersion) -> Value {
    let mut downgraded = data.clone();

    if target >= V1_3 {
        return downgraded;
    }

    if let Some(map) = downgraded.as_object_mut() {
        for (introduced, field) in fields_added_in(resource_type) {
            if target < *introduced {
                map.remove(*field);
            }
        }
    }

    downgraded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ResourceId;
    use crate::resource::make_node;
    use crate::version::V1_0;

    #[test]
    fn test_downgrade_to_native_is_identity() {
        let node = make_node(&ResourceId::random(), "n", "http", &["10.0.0.1".into()], 3212);
        assert_eq!(downgrade(ResourceType::Node, &node.data, V1_3), node.data);
    }

    #[test]
    fn test_downgrade_node_to_v1_0_strips_api() {
        let node = make_node(&ResourceId::random(), "n", "http", &["10.0.0.1".into()], 3212);
        let downgraded = downgrade(ResourceType::Node, &node.data, V1_0);

        assert!(downgraded.get("api").is_none());
        assert!(downgraded.get("tags").is_none());
        // v1.0 fields survive
        assert!(downgraded.get("href").is_some());
        assert_eq!(downgraded["id"], node.data["id"]);
    }

    #[test]
    fn test_downgrade_node_to_v1_1_keeps_api_strips_interfaces() {
        let node = make_node(&ResourceId::random(), "n", "http", &["10.0.0.1".into()], 3212);
        let downgraded = downgrade(ResourceType::Node, &node.data, V1_1);

        assert!(downgraded.get("api").is_some());
        assert!(downgraded.get("interfaces").is_none());
    }
}
