//! Per-type resource version counters.
//!
//! In peer-to-peer operation the node advertises one counter per resource
//! type as `ver_*` TXT records, so peers can detect that its resource set
//! has changed without polling the Node API.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceType;

/// One non-negative counter per resource type, incremented on every change
/// event of that type. Counters never decrease within a process lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceVersions {
    pub node: u64,
    pub devices: u64,
    pub sources: u64,
    pub flows: u64,
    pub senders: u64,
    pub receivers: u64,
}

impl ApiResourceVersions {
    /// Bumps the counter for the given resource type.
    pub fn increment(&mut self, resource_type: ResourceType) {
        match resource_type {
            ResourceType::Node => self.node += 1,
            ResourceType::Device => self.devices += 1,
            ResourceType::Source => self.sources += 1,
            ResourceType::Flow => self.flows += 1,
            ResourceType::Sender => self.senders += 1,
            ResourceType::Receiver => self.receivers += 1,
        }
    }

    /// The `ver_*` TXT records, in their advertised order.
    pub fn txt_records(&self) -> Vec<(String, String)> {
        vec![
            ("ver_slf".into(), self.node.to_string()),
            ("ver_dev".into(), self.devices.to_string()),
            ("ver_src".into(), self.sources.to_string()),
            ("ver_flw".into(), self.flows.to_string()),
            ("ver_snd".into(), self.senders.to_string()),
            ("ver_rcv".into(), self.receivers.to_string()),
        ]
    }
}
