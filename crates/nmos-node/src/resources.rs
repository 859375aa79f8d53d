//! Example node resources.
//!
//! Seeds the store with the node resource and a device, the minimal resource
//! set a typical node would construct before starting the behaviour agent.

use serde_json::{json, Value};
use tracing::info;

use crate::config::NodeConfig;
use crate::error::NodeResult;
use nmos_model::{
    make_device, make_flow, make_node, make_receiver, make_sender, make_source, NodeStore,
    Resource, ResourceId,
};

fn resource_id(seed: Option<&str>, name: &str) -> ResourceId {
    match seed {
        Some(seed) => ResourceId::from_seed(seed, name),
        None => ResourceId::random(),
    }
}

// One control endpoint per host address for an API exposed on `port`.
fn control_endpoints(config: &NodeConfig, port: u16, api: &str, urn: &str) -> Vec<Value> {
    config
        .all_host_addresses()
        .iter()
        .map(|host| {
            json!({
                "href": format!("{}://{}:{}/x-nmos/{}", config.http_scheme(), host, port, api),
                "type": urn,
            })
        })
        .collect()
}

// The device advertises the Connection and Events APIs when their ports are
// configured.
fn apply_device_controls(device: &mut Resource, config: &NodeConfig) {
    let mut controls = Vec::new();

    if let Some(port) = config.connection_port {
        controls.extend(control_endpoints(
            config,
            port,
            "connection/v1.1",
            "urn:x-nmos:control:sr-ctrl/v1.1",
        ));
    }

    if let Some(port) = config.events_port {
        controls.extend(control_endpoints(
            config,
            port,
            "events/v1.0",
            "urn:x-nmos:control:events/v1.0",
        ));
    }

    if !controls.is_empty() {
        device.data["controls"] = Value::Array(controls);
    }
}

/// Inserts a node resource and its sub-resources according to the settings:
/// one device with a video source, flow, sender and receiver.
///
/// The node resource is inserted first so that the first event a registry
/// sees is always the node's own creation; sub-resources follow their
/// super-resources.
pub async fn insert_node_resources(store: &NodeStore, config: &NodeConfig) -> NodeResult<()> {
    let seed = config.seed_id.as_deref();
    let node_id = resource_id(seed, "node");
    let device_id = resource_id(seed, "device/0");
    let source_id = resource_id(seed, "source/0");
    let flow_id = resource_id(seed, "flow/0");
    let sender_id = resource_id(seed, "sender/0");
    let receiver_id = resource_id(seed, "receiver/0");

    let node = make_node(
        &node_id,
        "nmos-node",
        config.http_scheme(),
        &config.all_host_addresses(),
        config.node_port,
    );
    let mut device = make_device(
        &device_id,
        &node_id,
        "nmos-node device",
        std::slice::from_ref(&sender_id),
        std::slice::from_ref(&receiver_id),
    );
    apply_device_controls(&mut device, config);

    let source = make_source(
        &source_id,
        &device_id,
        "nmos-node source",
        "urn:x-nmos:format:video",
    );
    let flow = make_flow(
        &flow_id,
        &source_id,
        &device_id,
        "nmos-node flow",
        "urn:x-nmos:format:video",
        "video/raw",
    );

    let manifest_href = format!(
        "{}://{}:{}/x-nmos/node/v1.3/senders/{}/transportfile",
        config.http_scheme(),
        config.host_address,
        config.node_port,
        sender_id
    );
    let sender = make_sender(
        &sender_id,
        &flow_id,
        &device_id,
        "nmos-node sender",
        &manifest_href,
        &[],
    );
    let receiver = make_receiver(
        &receiver_id,
        &device_id,
        "nmos-node receiver",
        "urn:x-nmos:format:video",
        &["video/raw".to_string()],
    );

    info!(%node_id, %device_id, "Inserting node resources");

    store.insert(node).await?;
    store.insert(device).await?;
    store.insert(source).await?;
    store.insert(flow).await?;
    store.insert(sender).await?;
    store.insert(receiver).await?;

    Ok(())
}
