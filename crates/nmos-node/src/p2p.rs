//! Peer-to-peer advertisement.
//!
//! When no registry can be located the node must advertise per-resource-type
//! version counters as `ver_*` TXT records on its `_nmos-node._tcp`
//! advertisement, so peers can detect changes to its resource set. Once a
//! registry is found (by the periodic background rediscovery) the `ver_*`
//! records are withdrawn again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::config::{NodeConfig, NO_PRIORITY};
use crate::discovery::{discover_registration_services, RegistryList};
use crate::error::NodeResult;
use crate::mdns::{ServiceAdvertiser, ServiceBrowser, TxtRecords, NODE_SERVICE};
use nmos_model::ApiResourceVersions;

// =============================================================================
// Node Advertisement
// =============================================================================

/// The node's base TXT records: `api_proto`, `api_ver`, `pri`.
pub fn make_node_txt_records(config: &NodeConfig) -> TxtRecords {
    let mut txt = TxtRecords::new();
    txt.push("api_proto", config.http_scheme());
    txt.push("api_ver", config.api_ver_txt());
    txt.push("pri", config.pri.to_string());
    txt
}

/// Registers the node's service advertisement.
///
/// A `pri` of 100 (`no_priority`) allows the node to run unadvertised.
pub async fn advertise_node_service(
    advertiser: &dyn ServiceAdvertiser,
    config: &NodeConfig,
) -> NodeResult<()> {
    if config.pri == NO_PRIORITY {
        debug!("Node advertisement suppressed (no_priority)");
        return Ok(());
    }

    advertiser
        .register_service(NODE_SERVICE, config.node_port, make_node_txt_records(config))
        .await
}

/// Updates the node's advertisement, appending `ver_*` records when the
/// per-type counters are given and withdrawing them when not.
pub async fn update_node_service(
    advertiser: &dyn ServiceAdvertiser,
    config: &NodeConfig,
    versions: Option<&ApiResourceVersions>,
) -> NodeResult<()> {
    if config.pri == NO_PRIORITY {
        return Ok(());
    }

    let mut txt = make_node_txt_records(config);
    if let Some(versions) = versions {
        for (key, value) in versions.txt_records() {
            txt.push(key, value);
        }
    }

    advertiser.update_service(NODE_SERVICE, txt).await
}

// =============================================================================
// Background Rediscovery
// =============================================================================

/// Periodic registry rediscovery, run while in peer-to-peer operation.
///
/// Retries discovery on a fixed interval and signals the state machine with
/// the first non-empty registry list, then exits.
pub struct RediscoveryTask {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

impl RediscoveryTask {
    pub fn spawn(
        browser: Arc<dyn ServiceBrowser>,
        fallback: Option<Url>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<RegistryList>) {
        let (found_tx, found_rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(?interval, "Background registry rediscovery started");

            loop {
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            debug!("Rediscovery cancelled");
                            return;
                        }
                        continue;
                    }
                }

                let services =
                    discover_registration_services(browser.as_ref(), fallback.as_ref()).await;
                if !services.is_empty() {
                    let _ = found_tx.send(services).await;
                    break;
                }
            }

            info!("Background registry rediscovery stopped");
        });

        (RediscoveryTask { handle, cancel_tx }, found_rx)
    }

    /// Cancels the task and waits for it to finish.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        let _ = self.handle.await;
    }
}
