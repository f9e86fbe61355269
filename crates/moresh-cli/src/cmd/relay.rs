//! `moresh relay`: run the signaling relay until Ctrl+C.

use crate::ui;
use moresh_types::config::MoreshConfig;
use moresh_wire::{Registry, RelayServer};
use std::net::SocketAddr;
use tracing::info;

pub async fn run(config: MoreshConfig, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let mut relay_config = config.relay;
    if let Some(addr) = listen {
        relay_config.listen_addr = addr;
    }

    let (server, task) = RelayServer::start(relay_config, Registry::new()).await?;
    ui::section("Moresh relay");
    ui::kv("Listening", &server.url());
    ui::hint("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!(peers = server.registry().len(), "Shutting down relay");
    server.shutdown();
    task.await?;
    ui::success("Relay stopped");
    Ok(())
}
