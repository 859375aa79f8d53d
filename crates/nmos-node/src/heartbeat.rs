//! Registration heartbeats.
//!
//! In registered operation the node persists itself in the registry by
//! POSTing `/health/nodes/<id>` every few seconds. The first heartbeat on a
//! newly selected registry is issued synchronously to probe whether the node
//! is still known there; only then is the periodic background task started.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace};
use url::Url;

use crate::error::{NodeError, NodeResult};
use crate::registration::RegistryTransport;
use nmos_model::ResourceId;

/// Why the background heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// The registry answered 404: the node is no longer known there and must
    /// re-register each of its resources in order.
    Unregistered,
    /// A 5xx or transport failure: the selected registry is unusable.
    ServiceError,
}

/// Issues one heartbeat and reports whether the node is still registered.
///
/// Returns `Ok(true)` on 200, `Ok(false)` on 404, and an error for 5xx or
/// transport failures. Any other status is logged and treated as healthy.
pub(crate) async fn update_node_health(
    transport: &dyn RegistryTransport,
    base: &Url,
    node_id: &ResourceId,
) -> NodeResult<bool> {
    trace!(%node_id, "Posting registration heartbeat");

    let status = transport.post_health(base, node_id).await?;

    match status {
        200 => Ok(true),
        404 => {
            // there is a recovery strategy, but it is definitely unexpected
            error!(status, "Registration heartbeat error");
            Ok(false)
        }
        status if (500..600).contains(&status) => {
            error!(status, "Registration heartbeat error");
            Err(NodeError::ServiceError { status })
        }
        status => {
            error!(status, "Unexpected heartbeat status");
            Ok(true)
        }
    }
}

/// The periodic background heartbeat loop.
///
/// Exactly one task is active while the agent is in registered operation;
/// it exits on the first 404 or service error, signalling the state machine
/// through the channel returned by [`HeartbeatTask::spawn`].
pub struct HeartbeatTask {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

impl HeartbeatTask {
    /// Spawns the heartbeat loop against the given registry.
    pub fn spawn(
        transport: Arc<dyn RegistryTransport>,
        base: Url,
        node_id: ResourceId,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<HeartbeatSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(registry = %base, ?interval, "Heartbeat loop started");

            loop {
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            debug!("Heartbeat loop cancelled");
                            return;
                        }
                        continue;
                    }
                }

                match update_node_health(transport.as_ref(), &base, &node_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = signal_tx.send(HeartbeatSignal::Unregistered).await;
                        break;
                    }
                    Err(e) => {
                        debug!(?e, "Heartbeat failed");
                        let _ = signal_tx.send(HeartbeatSignal::ServiceError).await;
                        break;
                    }
                }
            }

            info!("Heartbeat loop stopped");
        });

        (HeartbeatTask { handle, cancel_tx }, signal_rx)
    }

    /// Cancels the loop and waits for it to finish.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::registration::RegistrationRequest;

    struct ScriptedHealth {
        statuses: Vec<u16>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistryTransport for ScriptedHealth {
        async fn post_resource(&self, _: &Url, _: &RegistrationRequest) -> NodeResult<u16> {
            Ok(201)
        }

        async fn delete_resource(&self, _: &Url, _: &str) -> NodeResult<u16> {
            Ok(204)
        }

        async fn post_health(&self, _: &Url, _: &ResourceId) -> NodeResult<u16> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.statuses.get(call).unwrap_or(&200))
        }
    }

    fn base() -> Url {
        Url::parse("http://r:8235/x-nmos/registration/v1.3").unwrap()
    }

    #[tokio::test]
    async fn test_update_node_health_statuses() {
        let transport = ScriptedHealth {
            statuses: vec![200, 404, 503, 202],
            calls: AtomicUsize::new(0),
        };
        let id = ResourceId::random();

        assert!(update_node_health(&transport, &base(), &id).await.unwrap());
        assert!(!update_node_health(&transport, &base(), &id).await.unwrap());
        assert!(matches!(
            update_node_health(&transport, &base(), &id).await,
            Err(NodeError::ServiceError { status: 503 })
        ));
        // an unexpected non-error status is logged but treated as healthy
        assert!(update_node_health(&transport, &base(), &id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_signals_unregistered() {
        let transport = Arc::new(ScriptedHealth {
            statuses: vec![200, 404],
            calls: AtomicUsize::new(0),
        });

        let (task, mut signal_rx) = HeartbeatTask::spawn(
            transport,
            base(),
            ResourceId::random(),
            Duration::from_secs(5),
        );

        assert_eq!(signal_rx.recv().await, Some(HeartbeatSignal::Unregistered));
        task.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_cancel_joins() {
        let transport = Arc::new(ScriptedHealth {
            statuses: vec![],
            calls: AtomicUsize::new(0),
        });

        let (task, _signal_rx) = HeartbeatTask::spawn(
            transport,
            base(),
            ResourceId::random(),
            Duration::from_secs(5),
        );

        task.cancel().await;
    }
}
