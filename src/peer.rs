//! Privileged peer entrypoint: answers the metadata queries the agent is not
//! allowed to run itself.

use std::sync::Arc;

use anyhow::{Result, ensure};
use nix::unistd::geteuid;
use peer_api::server::{PeerContext, run_peer_server};
use proc_common::ProcfsReader;
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    cli::peer::PeerOpts,
    config::{PEER_SECTION, VigilConfig},
};

pub async fn vigil_peer_run(options: &PeerOpts) -> Result<()> {
    log::trace!("Vigil peer options: {:?}", options);

    ensure!(geteuid().is_root(), "You must run this as root user!!!");

    let config = VigilConfig::load(options.config_file.as_deref())?;
    let peer_config = config.get_section(PEER_SECTION);
    let socket_path = options
        .socket_path
        .clone()
        .or_else(|| peer_config.get_raw("socket_path").map(str::to_string));
    let socket_group = peer_config.get_raw("socket_group");
    if socket_group.is_none() {
        log::warn!("No [peer] socket_group configured, only root can query the peer");
    }

    let server_handle = run_peer_server(
        PeerContext {
            reader: Arc::new(ProcfsReader),
        },
        socket_path.as_deref(),
        socket_group,
    )?;

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sig_int.recv() => log::trace!("SIGINT received"),
        _ = sig_term.recv() => log::trace!("SIGTERM received"),
    }

    log::info!("Terminating the Vigil peer...");
    server_handle.stop().await;

    Ok(())
}
