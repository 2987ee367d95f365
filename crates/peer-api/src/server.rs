use std::{fs::Permissions, os::unix::fs::PermissionsExt, path::Path as FsPath, sync::Arc};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use nix::unistd::{Group, Pid, chown};
use proc_common::{RawProcessReader, read_arguments};
use tokio::{net::UnixListener, sync::oneshot, task::JoinHandle};

use crate::{
    dto::{ArgumentsReply, ParentReply, PathReply},
    error::PeerApiError,
};

/// Only the owner and the socket group may query the peer.
const SOCKET_MODE: u32 = 0o660;

pub struct ServerHandle {
    tx_shutdown: oneshot::Sender<()>,
    server_join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn stop(self) {
        drop(self.tx_shutdown);
        let _ = self.server_join_handle.await;
    }
}

#[derive(Clone)]
pub struct PeerContext {
    pub reader: Arc<dyn RawProcessReader>,
}

/// Serve the process queries on a unix socket.
///
/// The socket is restricted to its owner and to `socket_group` when given:
/// agents allowed to escalate must belong to that group.
pub fn run_peer_server(
    ctx: PeerContext,
    custom_socket_path: Option<&str>,
    socket_group: Option<&str>,
) -> Result<ServerHandle> {
    let process = Router::new()
        .route("/{pid}/path", get(process_path))
        .route("/{pid}/parent", get(process_parent))
        .route("/{pid}/cwd", get(process_cwd))
        .route("/{pid}/args", get(process_args));

    let app = Router::new().nest("/process", process).with_state(ctx);

    let socket_path = custom_socket_path.unwrap_or(super::DEFAULT_UDS).to_string();

    let socket_gid = socket_group
        .map(|group| {
            Group::from_name(group)
                .with_context(|| format!("Cannot look up group {group}"))?
                .map(|group| group.gid)
                .ok_or_else(|| anyhow!("Group {group} not found"))
        })
        .transpose()?;

    // A previous instance may have left its socket behind
    if FsPath::new(&socket_path).exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("Cannot remove stale socket {socket_path}"))?;
    }

    let uds =
        UnixListener::bind(&socket_path).map_err(|err| anyhow!("Cannot bind to socket: {err}"))?;
    std::fs::set_permissions(&socket_path, Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("Cannot set permissions of {socket_path}"))?;
    if let Some(gid) = socket_gid {
        chown(socket_path.as_str(), None, Some(gid))
            .with_context(|| format!("Cannot change the group of {socket_path}"))?;
    }
    log::debug!("listening on {}", socket_path);

    let (tx_shutdown, rx_shutdown) = oneshot::channel();

    let server = axum::serve(uds, app).with_graceful_shutdown(async move {
        let _ = rx_shutdown.await;
    });

    let server_join_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Peer server error: {}", e);
        }
        if let Err(e) = tokio::fs::remove_file(socket_path).await {
            log::error!("Error removing unix socket: {}", e);
        };
    });

    Ok(ServerHandle {
        tx_shutdown,
        server_join_handle,
    })
}

async fn process_path(
    State(ctx): State<PeerContext>,
    Path(pid): Path<i32>,
) -> Result<Json<PathReply>, PeerApiError> {
    let path = ctx.reader.image_path(Pid::from_raw(pid))?;
    Ok(Json(PathReply { path }))
}

async fn process_parent(
    State(ctx): State<PeerContext>,
    Path(pid): Path<i32>,
) -> Result<Json<ParentReply>, PeerApiError> {
    let status = ctx.reader.status(Pid::from_raw(pid))?;
    Ok(Json(ParentReply {
        ppid: status.ppid.as_raw(),
    }))
}

async fn process_cwd(
    State(ctx): State<PeerContext>,
    Path(pid): Path<i32>,
) -> Result<Json<PathReply>, PeerApiError> {
    let path = ctx.reader.cwd(Pid::from_raw(pid))?;
    Ok(Json(PathReply { path }))
}

async fn process_args(
    State(ctx): State<PeerContext>,
    Path(pid): Path<i32>,
) -> Result<Json<ArgumentsReply>, PeerApiError> {
    let argv = read_arguments(ctx.reader.as_ref(), Pid::from_raw(pid))?;
    Ok(Json(ArgumentsReply { argv }))
}
