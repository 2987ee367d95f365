use std::{future::Future, path::PathBuf, sync::Arc};

use peer_api::{client::PeerClient, error::PeerError};
use proc_common::{RawProcessReader, ReadError, ReadErrorKind, read_arguments};
use thiserror::Error;
use tokio::task::JoinError;
use vigil_core::Pid;

/// Capability to answer process metadata queries.
///
/// [`LocalSource`] queries the OS directly with the privileges of the agent,
/// [`DelegatedSource`] asks the privileged peer to do it.
pub trait MetadataSource: Send + Sync {
    fn path(&self, pid: Pid) -> impl Future<Output = Result<PathBuf, SourceError>> + Send;

    fn parent_pid(&self, pid: Pid) -> impl Future<Output = Result<Pid, SourceError>> + Send;

    fn cwd(&self, pid: Pid) -> impl Future<Output = Result<PathBuf, SourceError>> + Send;

    /// Argument vector without the image path. Best effort: only a failure to
    /// reach the process is an error.
    fn arguments(&self, pid: Pid)
    -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("no privileged peer configured")]
    PeerDisabled,
    #[error("metadata query task failed")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// The process has already exited.
    NotFound,
    PermissionDenied,
    /// The privileged peer can't be reached.
    Unavailable,
    Other,
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Read(err) => match err.kind() {
                ReadErrorKind::NotFound => SourceErrorKind::NotFound,
                ReadErrorKind::PermissionDenied => SourceErrorKind::PermissionDenied,
                ReadErrorKind::Other => SourceErrorKind::Other,
            },
            SourceError::Peer(PeerError::NotFound) => SourceErrorKind::NotFound,
            SourceError::Peer(PeerError::PermissionDenied) => SourceErrorKind::PermissionDenied,
            SourceError::Peer(PeerError::Unavailable(_)) | SourceError::PeerDisabled => {
                SourceErrorKind::Unavailable
            }
            SourceError::Peer(PeerError::UnexpectedResponse(_)) | SourceError::Task(_) => {
                SourceErrorKind::Other
            }
        }
    }
}

/// Direct queries through a [`RawProcessReader`].
///
/// Raw reads block on the filesystem: they run on the blocking thread pool.
#[derive(Debug, Default)]
pub struct LocalSource<R> {
    reader: Arc<R>,
}

impl<R> Clone for LocalSource<R> {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

impl<R: RawProcessReader + 'static> LocalSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Arc::new(reader),
        }
    }

    async fn query<T, F>(&self, query: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&R) -> Result<T, ReadError> + Send + 'static,
    {
        let reader = Arc::clone(&self.reader);
        Ok(tokio::task::spawn_blocking(move || query(&reader)).await??)
    }
}

impl<R: RawProcessReader + 'static> MetadataSource for LocalSource<R> {
    async fn path(&self, pid: Pid) -> Result<PathBuf, SourceError> {
        self.query(move |reader| reader.image_path(pid)).await
    }

    async fn parent_pid(&self, pid: Pid) -> Result<Pid, SourceError> {
        self.query(move |reader| reader.status(pid).map(|status| status.ppid))
            .await
    }

    async fn cwd(&self, pid: Pid) -> Result<PathBuf, SourceError> {
        self.query(move |reader| reader.cwd(pid)).await
    }

    async fn arguments(&self, pid: Pid) -> Result<Vec<String>, SourceError> {
        self.query(move |reader| read_arguments(reader, pid)).await
    }
}

/// Queries forwarded to the privileged peer.
#[derive(Debug, Clone, Default)]
pub struct DelegatedSource {
    client: Option<PeerClient>,
}

impl DelegatedSource {
    pub fn new(client: PeerClient) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// No peer available: every query fails as unavailable.
    pub fn disabled() -> Self {
        Self { client: None }
    }

    fn client(&self) -> Result<&PeerClient, SourceError> {
        self.client.as_ref().ok_or(SourceError::PeerDisabled)
    }
}

impl MetadataSource for DelegatedSource {
    async fn path(&self, pid: Pid) -> Result<PathBuf, SourceError> {
        Ok(self.client()?.process_path(pid).await?)
    }

    async fn parent_pid(&self, pid: Pid) -> Result<Pid, SourceError> {
        Ok(self.client()?.parent_pid(pid).await?)
    }

    async fn cwd(&self, pid: Pid) -> Result<PathBuf, SourceError> {
        Ok(self.client()?.cwd(pid).await?)
    }

    async fn arguments(&self, pid: Pid) -> Result<Vec<String>, SourceError> {
        Ok(self.client()?.arguments(pid).await?)
    }
}
