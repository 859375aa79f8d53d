//! # nmos-model: IS-04 Resource Model
//!
//! The local resource model of an NMOS node: the `/self` node description and
//! its sub-resources (devices, sources, flows, senders, receivers), plus the
//! change-event plumbing the node behaviour agent consumes.
//!
//! ## Model Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Resource Model                                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        NodeStore                                 │  │
//! │  │                                                                  │  │
//! │  │  Insertion-ordered collection of resources.                      │  │
//! │  │  insert / modify / remove each emit a ResourceEvent              │  │
//! │  │  into the EventGrain; resync() replaces the grain with           │  │
//! │  │  one 'sync' event per held resource.                             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                        EventGrain                                │  │
//! │  │                                                                  │  │
//! │  │  FIFO buffer of pending events + monotonic watermark.            │  │
//! │  │  The agent drains by atomically swapping the buffer out;         │  │
//! │  │  unprocessed events are restored ahead of later arrivals,        │  │
//! │  │  so an aborted drain never loses or reorders events.             │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`id`] - Resource identifiers (UUID-backed)
//! - [`version`] - IS-04 API versions and TAI version timestamps
//! - [`resource`] - Resource types and IS-04 resource constructors
//! - [`event`] - Resource change events
//! - [`grain`] - The pending-event buffer drained by the agent
//! - [`store`] - The mutable resource store
//! - [`versions`] - Per-type resource version counters (peer-to-peer TXT records)
//! - [`downgrade`] - API version downgrade of resource data
//! - [`error`] - Model error types

pub mod downgrade;
pub mod error;
pub mod event;
pub mod grain;
pub mod id;
pub mod resource;
pub mod store;
pub mod version;
pub mod versions;

pub use downgrade::downgrade;
pub use error::{ModelError, ModelResult};
pub use event::{EventKind, ResourceEvent};
pub use grain::EventGrain;
pub use id::ResourceId;
pub use resource::{
    make_device, make_flow, make_node, make_receiver, make_sender, make_source, Resource,
    ResourceType,
};
pub use store::NodeStore;
pub use version::{tai_now, ApiVersion};
pub use versions::ApiResourceVersions;
