//! Node configuration.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     NMOS_REGISTRY_ADDRESS=192.168.1.20                                 │
//! │     NMOS_PRI=30                                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/nmos-node/node.toml (Linux)                              │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     heartbeat 5s, backoff 1..30 x1.5, pri 100 (unadvertised)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{NodeError, NodeResult};
use nmos_model::version::supported_versions_txt;
use nmos_model::ApiVersion;

/// Priority value reserved to mean "do not advertise" on the node's own
/// advertisement, and "lowest preference" on a registry entry.
pub const NO_PRIORITY: u32 = 100;

/// Node configuration, the recognised settings of the behaviour agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Primary host address of the node.
    #[serde(default = "default_host_address")]
    pub host_address: String,

    /// All host addresses the node's APIs are reachable on.
    /// Defaults to `[host_address]` when empty.
    #[serde(default)]
    pub host_addresses: Vec<String>,

    /// Port of the Node API surface (used in the node's `href`).
    #[serde(default = "default_node_port")]
    pub node_port: u16,

    /// Port of the Connection API, if exposed.
    #[serde(default)]
    pub connection_port: Option<u16>,

    /// Port of the Events API, if exposed.
    #[serde(default)]
    pub events_port: Option<u16>,

    /// Port of the fallback registry's Registration API.
    #[serde(default = "default_registration_port")]
    pub registration_port: u16,

    /// Host address of a fallback registry, used when mDNS finds nothing.
    #[serde(default)]
    pub registry_address: Option<String>,

    /// API version of the fallback registry.
    #[serde(default = "default_registry_version")]
    pub registry_version: String,

    /// Minimum discovery backoff (seconds).
    #[serde(default = "default_backoff_min")]
    pub discovery_backoff_min: f64,

    /// Maximum discovery backoff (seconds); also the interval between
    /// background discovery attempts in peer-to-peer operation.
    #[serde(default = "default_backoff_max")]
    pub discovery_backoff_max: f64,

    /// Multiplier applied to the backoff after each failed attempt.
    #[serde(default = "default_backoff_factor")]
    pub discovery_backoff_factor: f64,

    /// Interval between registration heartbeats (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub registration_heartbeat_interval: u64,

    /// Advertised priority of this node (lower is higher priority;
    /// 100 suppresses the advertisement entirely).
    #[serde(default = "default_pri")]
    pub pri: u32,

    /// Whether the node's APIs are served over https.
    #[serde(default)]
    pub client_secure: bool,

    /// Seed for repeatable resource ids; random ids when unset.
    #[serde(default)]
    pub seed_id: Option<String>,
}

fn default_host_address() -> String {
    "127.0.0.1".to_string()
}

fn default_node_port() -> u16 {
    3212
}

fn default_registration_port() -> u16 {
    3210
}

fn default_registry_version() -> String {
    "v1.3".to_string()
}

fn default_backoff_min() -> f64 {
    1.0
}

fn default_backoff_max() -> f64 {
    30.0
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_pri() -> u32 {
    NO_PRIORITY
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host_address: default_host_address(),
            host_addresses: Vec::new(),
            node_port: default_node_port(),
            connection_port: None,
            events_port: None,
            registration_port: default_registration_port(),
            registry_address: None,
            registry_version: default_registry_version(),
            discovery_backoff_min: default_backoff_min(),
            discovery_backoff_max: default_backoff_max(),
            discovery_backoff_factor: default_backoff_factor(),
            registration_heartbeat_interval: default_heartbeat_interval(),
            pri: default_pri(),
            client_secure: false,
            seed_id: None,
        }
    }
}

impl NodeConfig {
    /// Loads configuration from file and environment.
    ///
    /// Load order (later overrides earlier): defaults, config file,
    /// environment variables.
    pub fn load(config_path: Option<PathBuf>) -> NodeResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading node config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| NodeError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if the load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load node config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> NodeResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| NodeError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NodeError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| NodeError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Node config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> NodeResult<()> {
        self.registry_version
            .parse::<ApiVersion>()
            .map_err(|_| NodeError::InvalidConfig(format!(
                "registry_version must be v<major>.<minor>, got: {}",
                self.registry_version
            )))?;

        if self.discovery_backoff_factor < 1.0 {
            return Err(NodeError::InvalidConfig(
                "discovery_backoff_factor must be at least 1.0".into(),
            ));
        }

        if self.discovery_backoff_min > self.discovery_backoff_max {
            return Err(NodeError::InvalidConfig(
                "discovery_backoff_min must not exceed discovery_backoff_max".into(),
            ));
        }

        if self.registration_heartbeat_interval == 0 {
            return Err(NodeError::InvalidConfig(
                "registration_heartbeat_interval must be greater than 0".into(),
            ));
        }

        if self.pri > NO_PRIORITY {
            return Err(NodeError::InvalidConfig(format!(
                "pri must be at most {}, got: {}",
                NO_PRIORITY, self.pri
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("NMOS_HOST_ADDRESS") {
            debug!(host_address = %address, "Overriding host address from environment");
            self.host_address = address;
        }

        if let Ok(address) = std::env::var("NMOS_REGISTRY_ADDRESS") {
            debug!(registry_address = %address, "Overriding registry address from environment");
            self.registry_address = Some(address);
        }

        if let Ok(port) = std::env::var("NMOS_REGISTRATION_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                self.registration_port = p;
            }
        }

        if let Ok(version) = std::env::var("NMOS_REGISTRY_VERSION") {
            self.registry_version = version;
        }

        if let Ok(pri) = std::env::var("NMOS_PRI") {
            if let Ok(p) = pri.parse::<u32>() {
                self.pri = p;
            }
        }

        if let Ok(interval) = std::env::var("NMOS_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.registration_heartbeat_interval = secs;
            }
        }

        if let Ok(seed) = std::env::var("NMOS_SEED_ID") {
            self.seed_id = Some(seed);
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("tv", "amwa", "nmos-node")
            .map(|dirs| dirs.config_dir().join("node.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The URI scheme of the node's APIs.
    pub fn http_scheme(&self) -> &'static str {
        if self.client_secure {
            "https"
        } else {
            "http"
        }
    }

    /// All host addresses, falling back to the primary address.
    pub fn all_host_addresses(&self) -> Vec<String> {
        if self.host_addresses.is_empty() {
            vec![self.host_address.clone()]
        } else {
            self.host_addresses.clone()
        }
    }

    /// The heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.registration_heartbeat_interval)
    }

    /// The interval between background discovery attempts in peer-to-peer
    /// operation.
    pub fn rediscovery_interval(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_backoff_max.max(1.0))
    }

    /// The comma-separated `api_ver` TXT value.
    pub fn api_ver_txt(&self) -> String {
        supported_versions_txt()
    }

    /// The base URI of the configured fallback registry, if any.
    pub fn fallback_registry_uri(&self) -> Option<Url> {
        let host = self.registry_address.as_deref()?;
        let uri = format!(
            "{}://{}:{}/x-nmos/registration/{}",
            self.http_scheme(),
            host,
            self.registration_port,
            self.registry_version
        );

        match Url::parse(&uri) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(%uri, ?e, "Ignoring unparseable fallback registry URI");
                None
            }
        }
    }
}
