//! # nmos-node: IS-04 Node Behaviour Agent
//!
//! The long-lived control loop that, on behalf of a media node, discovers a
//! Registration API on the local network, registers the node and its
//! sub-resources, keeps the registration alive with periodic heartbeats,
//! propagates local resource changes as incremental registry updates, and
//! falls back to peer-to-peer advertisement with version counters in mDNS
//! TXT records when no registry is available.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Node Behaviour Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 NodeBehaviour (State Machine)                    │  │
//! │  │                                                                  │  │
//! │  │  Drives discovery → registration → operation → rediscovery      │  │
//! │  │  → peer-to-peer, draining the store's event grain in the        │  │
//! │  │  registered modes                                                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   Discovery    │  │  Registration  │  │   HeartbeatTask        │    │
//! │  │                │  │  Client        │  │                        │    │
//! │  │ Browse for     │  │ POST/DELETE    │  │ POST /health/nodes/id  │    │
//! │  │ Registration   │  │ /resource per  │  │ every 5s, signals 404  │    │
//! │  │ APIs by pri    │  │ change event   │  │ or 5xx to the machine  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────────────────────────────────┐    │
//! │  │ RediscoveryTask│  │  Peer-to-Peer Advertiser                   │    │
//! │  │                │  │                                            │    │
//! │  │ Periodic browse│  │ Publishes ver_slf/dev/src/flw/snd/rcv      │    │
//! │  │ while in P2P   │  │ TXT records; withdraws them on exit        │    │
//! │  └────────────────┘  └────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`behaviour`] - The five-state behaviour machine
//! - [`config`] - Node settings (registry fallback, backoff, heartbeat, pri)
//! - [`discovery`] - Registration API discovery and the priority-ordered list
//! - [`error`] - Node error types
//! - [`heartbeat`] - Synchronous probe and periodic background heartbeats
//! - [`mdns`] - Advertiser/browser traits and the LAN implementation
//! - [`p2p`] - Version TXT records and background rediscovery
//! - [`registration`] - Registration API client and per-event requests
//! - [`resources`] - Example resources constructed from the settings

pub mod behaviour;
pub mod config;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod mdns;
pub mod p2p;
pub mod registration;
pub mod resources;

pub use behaviour::NodeBehaviour;
pub use config::{NodeConfig, NO_PRIORITY};
pub use discovery::{discover_registration_services, RegistryList};
pub use error::{NodeError, NodeResult};
pub use heartbeat::{HeartbeatSignal, HeartbeatTask};
pub use mdns::{
    DiscoveredService, LanAdvertiser, LanBrowser, ServiceAdvertiser, ServiceBrowser, TxtRecords,
    NODE_SERVICE, REGISTRATION_SERVICE,
};
pub use registration::{HttpRegistryClient, RegistrationRequest, RegistryTransport};
pub use resources::insert_node_resources;
