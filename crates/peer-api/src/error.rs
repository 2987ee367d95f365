use axum::{http::StatusCode, response::IntoResponse};
use proc_common::{ReadError, ReadErrorKind};
use thiserror::Error;

/// Error answered by the peer for a failed query.
#[derive(Debug)]
pub enum PeerApiError {
    NotFound,
    PermissionDenied,
    InternalServerError,
}

impl PeerApiError {
    fn status_code(&self) -> StatusCode {
        match *self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PeerApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();

        match self {
            Self::NotFound => (status_code, "not found").into_response(),
            Self::PermissionDenied => (status_code, "permission denied").into_response(),
            Self::InternalServerError => (status_code, "internal").into_response(),
        }
    }
}

impl From<ReadError> for PeerApiError {
    fn from(error: ReadError) -> Self {
        match error.kind() {
            ReadErrorKind::NotFound => Self::NotFound,
            ReadErrorKind::PermissionDenied => Self::PermissionDenied,
            ReadErrorKind::Other => {
                log::warn!("query failed: {:?}", anyhow::Error::from(error));
                Self::InternalServerError
            }
        }
    }
}

/// Error seen by the agent when querying the peer.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The process has already exited.
    #[error("process not found")]
    NotFound,

    /// The peer itself isn't allowed to inspect the process.
    #[error("permission denied by peer")]
    PermissionDenied,

    /// The peer can't be reached.
    #[error("peer unreachable: {0}")]
    Unavailable(String),

    /// The peer answered with an unexpected response.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
