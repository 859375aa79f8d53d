//! Service advertisement and browsing.
//!
//! The behaviour agent only depends on the [`ServiceAdvertiser`] and
//! [`ServiceBrowser`] traits; a full DNS-SD stack can be dropped in behind
//! them. This module also ships a LAN implementation over UDP broadcast,
//! which answers browse requests with unicast announcements:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      LAN Discovery Protocol                             │
//! │                                                                         │
//! │  ┌─────────────┐     Browse(_nmos-registration._tcp)   ┌────────────┐   │
//! │  │    NODE     │ ────────────────────────────────────▶ │  REGISTRY  │   │
//! │  │             │     Announce(port, TXT records)       │            │   │
//! │  │             │ ◀──────────────────────────────────── │            │   │
//! │  └─────────────┘                                       └────────────┘   │
//! │                                                                         │
//! │  The node itself answers Browse(_nmos-node._tcp) with its own           │
//! │  announcement, carrying api_proto / api_ver / pri TXT records           │
//! │  (plus ver_* counters in peer-to-peer operation).                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};

// =============================================================================
// Constants
// =============================================================================

/// Service type advertised by every NMOS node.
pub const NODE_SERVICE: &str = "_nmos-node._tcp";

/// Service type advertised by registries and browsed by nodes.
pub const REGISTRATION_SERVICE: &str = "_nmos-registration._tcp";

/// Default UDP port for LAN discovery traffic.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5755;

/// Default time to wait for browse answers.
pub const DEFAULT_BROWSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Discovery message magic bytes for validation.
const DISCOVERY_MAGIC: &[u8; 4] = b"NMDS";

/// Protocol version for discovery messages.
const DISCOVERY_PROTOCOL_VERSION: u8 = 1;

// =============================================================================
// TXT Records
// =============================================================================

/// Ordered key=value TXT records attached to a service advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtRecords(Vec<(String, String)>);

impl TxtRecords {
    pub fn new() -> Self {
        TxtRecords(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Returns the value of the first record with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for TxtRecords {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        TxtRecords(iter.into_iter().collect())
    }
}

// =============================================================================
// Transport Traits
// =============================================================================

/// A service answer collected by a browse.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    /// Address the answer came from.
    pub host: IpAddr,
    /// Port carried in the announcement.
    pub port: u16,
    /// TXT records carried in the announcement.
    pub txt: TxtRecords,
}

/// Publishes and updates service advertisements.
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Registers a service of the given type on the given port.
    async fn register_service(
        &self,
        service_type: &str,
        port: u16,
        txt: TxtRecords,
    ) -> NodeResult<()>;

    /// Replaces the TXT records of an already registered service.
    async fn update_service(&self, service_type: &str, txt: TxtRecords) -> NodeResult<()>;
}

/// Browses for services of a given type.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    /// Performs one browse and returns the collected answers.
    async fn browse(&self, service_type: &str) -> NodeResult<Vec<DiscoveredService>>;
}

// =============================================================================
// Wire Format
// =============================================================================

/// Discovery message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum DiscoveryMessageType {
    /// Request for announcements of a service type.
    Browse = 1,
    /// Announcement of a service.
    Announce = 2,
}

impl TryFrom<u8> for DiscoveryMessageType {
    type Error = NodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DiscoveryMessageType::Browse),
            2 => Ok(DiscoveryMessageType::Announce),
            _ => Err(NodeError::InvalidAnswer(format!(
                "Unknown discovery message type: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DiscoveryMessage {
    Browse {
        service_type: String,
    },
    Announce {
        service_type: String,
        port: u16,
        txt: TxtRecords,
    },
}

fn push_str(msg: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    msg.push(bytes.len().min(u8::MAX as usize) as u8);
    msg.extend_from_slice(&bytes[..bytes.len().min(u8::MAX as usize)]);
}

fn read_str<'a>(payload: &'a [u8], offset: &mut usize) -> NodeResult<&'a str> {
    let len = *payload
        .get(*offset)
        .ok_or_else(|| NodeError::InvalidAnswer("Truncated string length".into()))?
        as usize;
    *offset += 1;

    let bytes = payload
        .get(*offset..*offset + len)
        .ok_or_else(|| NodeError::InvalidAnswer("Truncated string".into()))?;
    *offset += len;

    std::str::from_utf8(bytes).map_err(|_| NodeError::InvalidAnswer("Invalid UTF-8".into()))
}

fn build_browse(service_type: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(64);
    msg.extend_from_slice(DISCOVERY_MAGIC);
    msg.push(DISCOVERY_PROTOCOL_VERSION);
    msg.push(DiscoveryMessageType::Browse as u8);
    push_str(&mut msg, service_type);
    msg
}

fn build_announce(service_type: &str, port: u16, txt: &TxtRecords) -> Vec<u8> {
    let mut msg = Vec::with_capacity(256);
    msg.extend_from_slice(DISCOVERY_MAGIC);
    msg.push(DISCOVERY_PROTOCOL_VERSION);
    msg.push(DiscoveryMessageType::Announce as u8);
    push_str(&mut msg, service_type);
    msg.extend_from_slice(&port.to_be_bytes());
    msg.push(txt.len().min(u8::MAX as usize) as u8);
    for (key, value) in txt.iter().take(u8::MAX as usize) {
        push_str(&mut msg, key);
        push_str(&mut msg, value);
    }
    msg
}

fn parse_message(data: &[u8]) -> NodeResult<DiscoveryMessage> {
    if data.len() < 6 || &data[0..4] != DISCOVERY_MAGIC {
        return Err(NodeError::InvalidAnswer("Invalid discovery magic".into()));
    }

    if data[4] != DISCOVERY_PROTOCOL_VERSION {
        return Err(NodeError::InvalidAnswer(format!(
            "Unsupported discovery protocol version: {}",
            data[4]
        )));
    }

    let msg_type = DiscoveryMessageType::try_from(data[5])?;
    let payload = &data[6..];
    let mut offset = 0;

    let service_type = read_str(payload, &mut offset)?.to_string();

    match msg_type {
        DiscoveryMessageType::Browse => Ok(DiscoveryMessage::Browse { service_type }),
        DiscoveryMessageType::Announce => {
            let port_bytes = payload
                .get(offset..offset + 2)
                .ok_or_else(|| NodeError::InvalidAnswer("Truncated port".into()))?;
            let port = u16::from_be_bytes([port_bytes[0], port_bytes[1]]);
            offset += 2;

            let count = *payload
                .get(offset)
                .ok_or_else(|| NodeError::InvalidAnswer("Truncated record count".into()))?;
            offset += 1;

            let mut txt = TxtRecords::new();
            for _ in 0..count {
                let key = read_str(payload, &mut offset)?.to_string();
                let value = read_str(payload, &mut offset)?.to_string();
                txt.push(key, value);
            }

            Ok(DiscoveryMessage::Announce {
                service_type,
                port,
                txt,
            })
        }
    }
}

// =============================================================================
// LAN Advertiser
// =============================================================================

/// Advertises services over UDP broadcast and answers browse requests.
pub struct LanAdvertiser {
    discovery_port: u16,
    socket: Arc<UdpSocket>,
    services: Arc<RwLock<HashMap<String, (u16, TxtRecords)>>>,
    responder: tokio::task::JoinHandle<()>,
}

impl LanAdvertiser {
    /// Binds the advertisement socket and spawns the browse responder.
    pub async fn bind(discovery_port: u16) -> NodeResult<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, discovery_port);
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            NodeError::AdvertiseFailed(format!(
                "Failed to bind advertisement socket on port {}: {}",
                discovery_port, e
            ))
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| NodeError::AdvertiseFailed(format!("Failed to enable broadcast: {}", e)))?;

        info!(port = discovery_port, "Service advertiser started");

        let socket = Arc::new(socket);
        let services: Arc<RwLock<HashMap<String, (u16, TxtRecords)>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let responder_socket = socket.clone();
        let responder_services = services.clone();
        let responder = tokio::spawn(async move {
            Self::run_responder(responder_socket, responder_services).await;
        });

        Ok(LanAdvertiser {
            discovery_port,
            socket,
            services,
            responder,
        })
    }

    /// Answers incoming browse requests for registered services.
    async fn run_responder(
        socket: Arc<UdpSocket>,
        services: Arc<RwLock<HashMap<String, (u16, TxtRecords)>>>,
    ) {
        let mut buf = [0u8; 1024];

        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let message = match parse_message(&buf[..len]) {
                        Ok(message) => message,
                        Err(e) => {
                            debug!(?e, "Ignoring unparseable discovery message");
                            continue;
                        }
                    };

                    if let DiscoveryMessage::Browse { service_type } = message {
                        let held = services.read().await;
                        if let Some((port, txt)) = held.get(&service_type) {
                            debug!(%service_type, ?from, "Answering browse request");
                            let answer = build_announce(&service_type, *port, txt);
                            drop(held);
                            if let Err(e) = socket.send_to(&answer, from).await {
                                warn!(?e, "Failed to send announcement");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(?e, "Error receiving discovery message");
                }
            }
        }
    }

    async fn broadcast_announce(&self, service_type: &str) -> NodeResult<()> {
        let held = self.services.read().await;
        let Some((port, txt)) = held.get(service_type) else {
            return Err(NodeError::AdvertiseFailed(format!(
                "Service not registered: {}",
                service_type
            )));
        };

        let msg = build_announce(service_type, *port, txt);
        drop(held);

        let broadcast_addr =
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.discovery_port);
        self.socket
            .send_to(&msg, broadcast_addr)
            .await
            .map_err(|e| NodeError::AdvertiseFailed(format!("Broadcast failed: {}", e)))?;

        Ok(())
    }
}

impl Drop for LanAdvertiser {
    fn drop(&mut self) {
        self.responder.abort();
    }
}

#[async_trait]
impl ServiceAdvertiser for LanAdvertiser {
    async fn register_service(
        &self,
        service_type: &str,
        port: u16,
        txt: TxtRecords,
    ) -> NodeResult<()> {
        info!(%service_type, port, "Registering service");
        self.services
            .write()
            .await
            .insert(service_type.to_string(), (port, txt));
        self.broadcast_announce(service_type).await
    }

    async fn update_service(&self, service_type: &str, txt: TxtRecords) -> NodeResult<()> {
        let mut held = self.services.write().await;
        let entry = held.get_mut(service_type).ok_or_else(|| {
            NodeError::AdvertiseFailed(format!("Service not registered: {}", service_type))
        })?;
        entry.1 = txt;
        drop(held);

        debug!(%service_type, "Updated service TXT records");
        self.broadcast_announce(service_type).await
    }
}

// =============================================================================
// LAN Browser
// =============================================================================

/// One-shot browse over UDP broadcast.
pub struct LanBrowser {
    discovery_port: u16,
    browse_timeout: Duration,
}

impl LanBrowser {
    pub fn new(discovery_port: u16, browse_timeout: Duration) -> Self {
        LanBrowser {
            discovery_port,
            browse_timeout,
        }
    }
}

impl Default for LanBrowser {
    fn default() -> Self {
        LanBrowser::new(DEFAULT_DISCOVERY_PORT, DEFAULT_BROWSE_TIMEOUT)
    }
}

#[async_trait]
impl ServiceBrowser for LanBrowser {
    async fn browse(&self, service_type: &str) -> NodeResult<Vec<DiscoveredService>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|e| {
            NodeError::ConnectionFailed(format!("Failed to bind browse socket: {}", e))
        })?;
        socket
            .set_broadcast(true)
            .map_err(|e| NodeError::ConnectionFailed(format!("Failed to enable broadcast: {}", e)))?;

        let request = build_browse(service_type);
        let broadcast_addr =
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.discovery_port);
        socket.send_to(&request, broadcast_addr).await.map_err(|e| {
            NodeError::ConnectionFailed(format!("Failed to send browse request: {}", e))
        })?;

        debug!(%service_type, "Sent browse request, collecting answers");

        // collect answers until the timeout, deduplicated by origin
        let mut answers: HashMap<(IpAddr, u16), DiscoveredService> = HashMap::new();
        let mut buf = [0u8; 1024];
        let deadline = Instant::now() + self.browse_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => match parse_message(&buf[..len]) {
                    Ok(DiscoveryMessage::Announce {
                        service_type: answered_type,
                        port,
                        txt,
                    }) if answered_type == service_type => {
                        debug!(ip = %from.ip(), port, "Collected service answer");
                        answers.insert(
                            (from.ip(), port),
                            DiscoveredService {
                                host: from.ip(),
                                port,
                                txt,
                            },
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(?e, "Ignoring unparseable answer");
                    }
                },
                Ok(Err(e)) => {
                    debug!(?e, "Error receiving browse answer");
                }
                Err(_) => break,
            }
        }

        Ok(answers.into_values().collect())
    }
}
