//! The node behaviour state machine.
//!
//! The long-lived control loop that discovers a Registration API, registers
//! the node and its sub-resources, keeps the registration alive with
//! heartbeats, propagates local resource changes, and falls back to
//! peer-to-peer advertisement when no registry is available.
//!
//! ## Standard Registration Sequences
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Node Behaviour State Machine                        │
//! │                                                                         │
//! │                      ┌───────────────────┐                              │
//! │      backoff ──────▶ │ INITIAL_DISCOVERY │ ◀── all registries          │
//! │                      └───┬───────────┬───┘     exhausted                │
//! │              found ≥ 1   │           │ none found                       │
//! │                          ▼           ▼                                  │
//! │        ┌──────────────────────┐   ┌──────────────┐                      │
//! │        │ INITIAL_REGISTRATION │   │ PEER_TO_PEER │                      │
//! │        └──────────┬───────────┘   └──────┬───────┘                      │
//! │   node accepted   │        background    │ found ≥ 1                    │
//! │                   ▼        discovery ────┴──▶ INITIAL_REGISTRATION      │
//! │        ┌──────────────────────┐                                         │
//! │        │ REGISTERED_OPERATION │ ── heartbeat 404 ─▶ INITIAL_REGISTRATION│
//! │        └──────────┬───────────┘                                         │
//! │    all exhausted  │                                                     │
//! │                   ▼                                                     │
//! │            ┌─────────────┐ ── found ≥ 1 ──▶ REGISTERED_OPERATION        │
//! │            │ REDISCOVERY │                                              │
//! │            └─────────────┘ ── none found ──▶ PEER_TO_PEER               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One foreground loop drives the machine; at most two background tasks are
//! alive at any time (the heartbeat loop in registered operation, the
//! periodic rediscovery in peer-to-peer operation), each owning a
//! cancellation channel and signalling the foreground over mpsc.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::NodeConfig;
use crate::discovery::{discover_registration_services, RegistryList};
use crate::error::NodeResult;
use crate::heartbeat::{update_node_health, HeartbeatSignal, HeartbeatTask};
use crate::mdns::{ServiceAdvertiser, ServiceBrowser};
use crate::p2p::{advertise_node_service, update_node_service, RediscoveryTask};
use crate::registration::{request_registration, RegistryTransport};
use nmos_model::{ApiResourceVersions, EventKind, NodeStore, ResourceId, ResourceType};

// The primary modes (registered operation and peer-to-peer operation) plus
// the hopefully ephemeral states the node works through between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    InitialDiscovery,
    InitialRegistration,
    RegisteredOperation,
    Rediscovery,
    PeerToPeer,
}

/// The node behaviour agent.
pub struct NodeBehaviour {
    config: Arc<NodeConfig>,
    store: NodeStore,
    registry: Arc<dyn RegistryTransport>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    browser: Arc<dyn ServiceBrowser>,

    // there should be exactly one node resource, but it may not have been
    // added yet; it is identified during initial registration for use in
    // registered operation
    self_id: Option<ResourceId>,

    // per-type version counters, never reset within a process lifetime
    versions: ApiResourceVersions,
}

// a dropped shutdown sender counts as a shutdown request
fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

// resolves when shutdown is requested (or the shutdown sender is gone)
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn recv_signal(rx: &mut Option<mpsc::Receiver<HeartbeatSignal>>) -> Option<HeartbeatSignal> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl NodeBehaviour {
    pub fn new(
        config: Arc<NodeConfig>,
        store: NodeStore,
        registry: Arc<dyn RegistryTransport>,
        advertiser: Arc<dyn ServiceAdvertiser>,
        browser: Arc<dyn ServiceBrowser>,
    ) -> Self {
        NodeBehaviour {
            config,
            store,
            registry,
            advertiser,
            browser,
            self_id: None,
            versions: ApiResourceVersions::default(),
        }
    }

    /// Runs the behaviour until shutdown is requested.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> NodeResult<()> {
        // the node produces its service advertisement as soon as it is on
        // the network, independent of registry availability
        if let Err(e) = advertise_node_service(self.advertiser.as_ref(), &self.config).await {
            warn!(?e, "Failed to advertise node service");
        }

        let mut mode = Mode::InitialDiscovery;
        let mut services = RegistryList::new();
        let mut discovery_backoff = 0.0f64;

        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            match mode {
                Mode::InitialDiscovery => {
                    if discovery_backoff != 0.0 {
                        debug!(seconds = discovery_backoff, "Waiting before discovery attempt");
                        tokio::select! {
                            _ = sleep(Duration::from_secs_f64(discovery_backoff)) => {}
                            _ = shutdown_requested(&mut shutdown) => { break; }
                        }
                    }

                    services = discover_registration_services(
                        self.browser.as_ref(),
                        self.config.fallback_registry_uri().as_ref(),
                    )
                    .await;

                    if !services.is_empty() {
                        mode = Mode::InitialRegistration;

                        // exponential backoff until a non-5xx response is
                        // received, in case this attempt goes badly
                        discovery_backoff = self
                            .config
                            .discovery_backoff_min
                            .max(discovery_backoff * self.config.discovery_backoff_factor)
                            .min(self.config.discovery_backoff_max);
                    } else {
                        mode = Mode::PeerToPeer;
                    }
                }

                Mode::InitialRegistration => {
                    self.initial_registration(&mut services, &mut shutdown).await;

                    if !services.is_empty() {
                        mode = Mode::RegisteredOperation;
                        discovery_backoff = 0.0;
                    } else {
                        mode = Mode::InitialDiscovery;
                    }
                }

                Mode::RegisteredOperation => {
                    self.registered_operation(&mut services, &mut shutdown).await;

                    if !services.is_empty() {
                        // a 404 on heartbeat: the node must re-register each
                        // of its resources in order
                        mode = Mode::InitialRegistration;
                    } else {
                        mode = Mode::Rediscovery;
                    }
                }

                Mode::Rediscovery => {
                    services = discover_registration_services(
                        self.browser.as_ref(),
                        self.config.fallback_registry_uri().as_ref(),
                    )
                    .await;

                    if !services.is_empty() {
                        mode = Mode::RegisteredOperation;
                    } else {
                        mode = Mode::PeerToPeer;
                    }
                }

                Mode::PeerToPeer => {
                    services = self.peer_to_peer_operation(&mut shutdown).await;

                    if !services.is_empty() {
                        mode = Mode::InitialRegistration;
                    }
                }
            }
        }

        info!("Node behaviour stopped");
        Ok(())
    }

    // =========================================================================
    // Initial Registration
    // =========================================================================

    // The node registers itself by POSTing the object it holds under the Node
    // API's /self resource; everything else is handled in registered
    // operation once the node is accepted.
    async fn initial_registration(
        &mut self,
        services: &mut RegistryList,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        info!("Attempting initial registration");

        // reset the grain; if the node resource has already been added the
        // first event will be a 'sync' event for it
        self.store.resync().await;

        let grain = self.store.grain().clone();
        let mut grain_rx = grain.watermark();

        let mut registration_service_error = false;
        let mut node_registered = false;
        let mut most_recent_update = 0u64;

        loop {
            // wait for resource events (or this is the first time through),
            // a registration error, success, or shutdown
            loop {
                if is_shutdown(shutdown) || registration_service_error || node_registered {
                    break;
                }
                if *grain_rx.borrow_and_update() > most_recent_update {
                    break;
                }
                tokio::select! {
                    _ = shutdown_requested(shutdown) => {}
                    _ = grain_rx.changed() => {}
                }
            }

            if registration_service_error {
                services.pop_top();
                registration_service_error = false;
            }
            if is_shutdown(shutdown) || services.is_empty() || node_registered {
                break;
            }

            // the node selects a Registration API based on the priority
            let Some(base) = services.top().cloned() else {
                break;
            };

            let (mut events, watermark) = grain.take().await;
            most_recent_update = watermark;

            while let Some(event) = events.front().cloned() {
                if is_shutdown(shutdown) || registration_service_error || node_registered {
                    break;
                }

                let (id, resource_type) = match event.id_and_type() {
                    Ok(id_type) => id_type,
                    Err(e) => {
                        error!(?e, path = %event.path, "Discarding malformed event");
                        events.pop_front();
                        continue;
                    }
                };

                // discard events prior to the node 'added' or 'sync' event
                if !(resource_type == ResourceType::Node && event.kind.is_creation()) {
                    self.versions.increment(resource_type);
                    events.pop_front();
                    continue;
                }

                self.self_id = Some(id);

                info!(registry = %base, "Registering node with the Registration API");
                match request_registration(self.registry.as_ref(), &base, &event).await {
                    Ok(()) => {
                        self.versions.increment(resource_type);
                        events.pop_front();

                        // subsequent events are handled in registered operation
                        node_registered = true;
                    }
                    Err(e) if e.is_registry_service_error() => {
                        error!(?e, "Registration service error");
                        registration_service_error = true;
                    }
                    Err(e) => {
                        error!(?e, "Discarding event after unexpected error");
                        events.pop_front();
                    }
                }
            }

            grain.restore(events).await;
        }
    }

    // =========================================================================
    // Registered Operation
    // =========================================================================

    // The node persists itself in the registry by issuing heartbeats, and
    // registers its other resources by draining the grain.
    async fn registered_operation(
        &mut self,
        services: &mut RegistryList,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        info!("Adopting registered operation");

        let Some(self_id) = self.self_id.clone() else {
            // no node resource was ever identified; force rediscovery
            warn!("No node resource identified; abandoning registered operation");
            while services.pop_top().is_some() {}
            return;
        };

        let grain = self.store.grain().clone();
        let mut grain_rx = grain.watermark();

        let mut client_base: Option<Url> = None;
        let mut heartbeat: Option<HeartbeatTask> = None;
        let mut heartbeat_rx: Option<mpsc::Receiver<HeartbeatSignal>> = None;

        let mut registration_service_error = false;
        let mut node_unregistered = false;
        let mut most_recent_update = 0u64;

        loop {
            // wait for resource events (or this is the first time through),
            // a heartbeat outcome, an error, or shutdown
            loop {
                if is_shutdown(shutdown) || registration_service_error || node_unregistered {
                    break;
                }
                if *grain_rx.borrow_and_update() > most_recent_update {
                    break;
                }
                tokio::select! {
                    _ = shutdown_requested(shutdown) => {}
                    _ = grain_rx.changed() => {}
                    Some(signal) = recv_signal(&mut heartbeat_rx) => {
                        match signal {
                            HeartbeatSignal::Unregistered => node_unregistered = true,
                            HeartbeatSignal::ServiceError => registration_service_error = true,
                        }
                    }
                }
            }

            if registration_service_error {
                services.pop_top();
                registration_service_error = false;

                // the heartbeat loop belongs to the failed registry
                if let Some(task) = heartbeat.take() {
                    task.cancel().await;
                }
                heartbeat_rx = None;
                client_base = None;
            }
            if is_shutdown(shutdown) || services.is_empty() || node_unregistered {
                break;
            }

            // the node selects a Registration API based on the priority
            let Some(base) = services.top().cloned() else {
                break;
            };

            if client_base.as_ref() != Some(&base) {
                client_base = Some(base.clone());

                // the first interaction with a newly selected registry is a
                // heartbeat, to confirm whether the node is still present in
                // the registry; only then is the periodic loop started
                match update_node_health(self.registry.as_ref(), &base, &self_id).await {
                    Ok(true) => {
                        let (task, signal_rx) = HeartbeatTask::spawn(
                            self.registry.clone(),
                            base.clone(),
                            self_id.clone(),
                            self.config.heartbeat_interval(),
                        );
                        heartbeat = Some(task);
                        heartbeat_rx = Some(signal_rx);
                    }
                    Ok(false) => {
                        node_unregistered = true;
                    }
                    Err(e) => {
                        error!(?e, "Registration heartbeat error");
                        registration_service_error = true;
                    }
                }

                if is_shutdown(shutdown) || registration_service_error || node_unregistered {
                    continue;
                }
            }

            let (mut events, watermark) = grain.take().await;
            most_recent_update = watermark;

            while let Some(event) = events.front().cloned() {
                if is_shutdown(shutdown) || registration_service_error || node_unregistered {
                    break;
                }

                let (id, resource_type) = match event.id_and_type() {
                    Ok(id_type) => id_type,
                    Err(e) => {
                        error!(?e, path = %event.path, "Discarding malformed event");
                        events.pop_front();
                        continue;
                    }
                };

                match request_registration(self.registry.as_ref(), &base, &event).await {
                    Ok(()) => {
                        self.versions.increment(resource_type);

                        // following deletion of all other resources, the node
                        // resource may be deleted and heartbeating stopped
                        if id == self_id && event.kind == EventKind::Removed {
                            node_unregistered = true;
                        }

                        events.pop_front();
                    }
                    Err(e) if e.is_registry_service_error() => {
                        error!(?e, "Registration service error");
                        registration_service_error = true;
                    }
                    Err(e) => {
                        error!(?e, "Discarding event after unexpected error");
                        events.pop_front();
                    }
                }
            }

            grain.restore(events).await;
        }

        if let Some(task) = heartbeat.take() {
            task.cancel().await;
        }
    }

    // =========================================================================
    // Peer-to-Peer Operation
    // =========================================================================

    // With no registry available the node folds resource events into the
    // per-type version counters and advertises them as ver_* TXT records,
    // while a background task keeps retrying discovery.
    async fn peer_to_peer_operation(&mut self, shutdown: &mut watch::Receiver<bool>) -> RegistryList {
        info!("Adopting peer-to-peer operation");

        if let Err(e) =
            update_node_service(self.advertiser.as_ref(), &self.config, Some(&self.versions)).await
        {
            warn!(?e, "Failed to publish version records");
        }

        let (rediscovery, mut found_rx) = RediscoveryTask::spawn(
            self.browser.clone(),
            self.config.fallback_registry_uri(),
            self.config.rediscovery_interval(),
        );

        let grain = self.store.grain().clone();
        let mut grain_rx = grain.watermark();
        let mut most_recent_update = 0u64;
        let mut discovered = RegistryList::new();

        'operation: loop {
            // wait for resource events (or this is the first time through),
            // a discovered Registration API, or shutdown
            loop {
                if is_shutdown(shutdown) || !discovered.is_empty() {
                    break 'operation;
                }
                if *grain_rx.borrow_and_update() > most_recent_update {
                    break;
                }
                tokio::select! {
                    _ = shutdown_requested(shutdown) => {}
                    _ = grain_rx.changed() => {}
                    Some(services) = found_rx.recv() => {
                        discovered = services;
                    }
                }
            }

            let (events, watermark) = grain.take().await;
            most_recent_update = watermark;

            for event in &events {
                match event.id_and_type() {
                    Ok((_, resource_type)) => self.versions.increment(resource_type),
                    Err(e) => error!(?e, path = %event.path, "Discarding malformed event"),
                }
            }

            if !events.is_empty() {
                if let Err(e) = update_node_service(
                    self.advertiser.as_ref(),
                    &self.config,
                    Some(&self.versions),
                )
                .await
                {
                    warn!(?e, "Failed to update version records");
                }
            }
        }

        // withdraw the ver_* records
        if let Err(e) = update_node_service(self.advertiser.as_ref(), &self.config, None).await {
            warn!(?e, "Failed to withdraw version records");
        }

        rediscovery.cancel().await;

        discovered
    }
}
