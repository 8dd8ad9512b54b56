use crate::cli::require_config;
use crate::receiver::{start_server, ReceiverState};
use crate::storage::archive::Archive;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

pub async fn receive(
    config_path: Option<PathBuf>,
    listen: Option<SocketAddr>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = require_config(config_path)?;
    let listen = listen
        .or_else(|| config.receiver.as_ref().map(|r| r.listen))
        .ok_or("no listen address: set receiver.listen in config or pass --listen")?;

    let archive_dir = config
        .receiver_archive()
        .unwrap_or(&config.storage.archive)
        .clone();
    let archive = Archive::open(&archive_dir)?;
    info!(archive = %archive.dir().display(), entries = archive.len(), "Archive ready");

    start_server(listen, ReceiverState::new(archive), async {
        let _ = signal::ctrl_c().await;
        info!("Receiver shutting down gracefully");
    })
    .await?;

    Ok(())
}
