//! nmos-node binary: wires the real transports together and runs the node
//! behaviour until interrupted.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use nmos_model::NodeStore;
use nmos_node::mdns::DEFAULT_DISCOVERY_PORT;
use nmos_node::{
    insert_node_resources, HttpRegistryClient, LanAdvertiser, LanBrowser, NodeBehaviour,
    NodeConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    let config = Arc::new(NodeConfig::load_or_default(None));
    config.validate()?;

    let store = NodeStore::new();
    insert_node_resources(&store, &config).await?;

    let registry = Arc::new(HttpRegistryClient::new(HttpRegistryClient::DEFAULT_TIMEOUT)?);
    let advertiser = Arc::new(LanAdvertiser::bind(DEFAULT_DISCOVERY_PORT).await?);
    let browser = Arc::new(LanBrowser::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Starting node behaviour");
    NodeBehaviour::new(config, store, registry, advertiser, browser)
        .run(shutdown_rx)
        .await?;

    Ok(())
}
