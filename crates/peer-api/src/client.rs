use std::{path::PathBuf, time::Duration};

use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request, StatusCode, Uri, body::Bytes};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;

use crate::{
    dto::{ArgumentsReply, ParentReply, PathReply},
    error::PeerError,
};

/// Agent side of the privileged channel.
///
/// The connection is opened per request: a peer started after the agent is
/// picked up without reconfiguration. A query not answered within the client
/// timeout fails as [`PeerError::Unavailable`].
#[derive(Debug, Clone)]
pub struct PeerClient {
    socket: String,
    client: Client<UnixConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl PeerClient {
    pub fn new() -> Self {
        Self::unix(super::DEFAULT_UDS.to_owned())
    }

    pub fn unix(socket: String) -> Self {
        Self {
            socket,
            client: Client::unix(),
            timeout: super::DEFAULT_PEER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn uri<T: AsRef<str>>(&self, path: T) -> Uri {
        hyperlocal::Uri::new(self.socket.clone(), path.as_ref()).into()
    }

    async fn get<T: DeserializeOwned>(&self, uri: Uri) -> Result<T, PeerError> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Empty::<Bytes>::new())
            .map_err(|err| PeerError::UnexpectedResponse(err.to_string()))?;

        let (status, body) = tokio::time::timeout(self.timeout, self.send(req))
            .await
            .map_err(|_| {
                PeerError::Unavailable(format!(
                    "no reply within {}ms",
                    self.timeout.as_millis()
                ))
            })??;

        match status {
            StatusCode::OK => serde_json::from_slice(&body)
                .map_err(|err| PeerError::UnexpectedResponse(err.to_string())),
            StatusCode::NOT_FOUND => Err(PeerError::NotFound),
            StatusCode::FORBIDDEN => Err(PeerError::PermissionDenied),
            _ => Err(PeerError::UnexpectedResponse(format!(
                "{status}: {}",
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    async fn send(&self, req: Request<Empty<Bytes>>) -> Result<(StatusCode, Bytes), PeerError> {
        let res = self
            .client
            .request(req)
            .await
            .map_err(|err| PeerError::Unavailable(err.to_string()))?;

        let status = res.status();

        let body = res
            .collect()
            .await
            .map_err(|err| PeerError::Unavailable(err.to_string()))?
            .to_bytes();

        Ok((status, body))
    }

    pub async fn process_path(&self, pid: Pid) -> Result<PathBuf, PeerError> {
        let reply: PathReply = self.get(self.uri(format!("/process/{pid}/path"))).await?;
        Ok(reply.path)
    }

    pub async fn parent_pid(&self, pid: Pid) -> Result<Pid, PeerError> {
        let reply: ParentReply = self.get(self.uri(format!("/process/{pid}/parent"))).await?;
        Ok(Pid::from_raw(reply.ppid))
    }

    pub async fn cwd(&self, pid: Pid) -> Result<PathBuf, PeerError> {
        let reply: PathReply = self.get(self.uri(format!("/process/{pid}/cwd"))).await?;
        Ok(reply.path)
    }

    pub async fn arguments(&self, pid: Pid) -> Result<Vec<String>, PeerError> {
        let reply: ArgumentsReply = self.get(self.uri(format!("/process/{pid}/args"))).await?;
        Ok(reply.argv)
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}
