use std::io;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::sync::oneshot;

/// Verdict on an authorization request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthDecision {
    Allow,
    Deny,
}

impl AuthDecision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            AuthDecision::Allow
        } else {
            AuthDecision::Deny
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("the kernel source is gone")]
    SourceGone,
    #[error("writing the reply failed")]
    Io(#[from] io::Error),
}

/// Handle used to answer the kernel source waiting on an authorization.
///
/// Delivering a decision consumes the handle.
pub trait ReplyHandle: Send + Sync {
    fn reply(self: Box<Self>, decision: AuthDecision) -> Result<(), ReplyError>;
}

/// In-process [`ReplyHandle`] answering on a oneshot channel.
pub struct ChannelReplyHandle {
    tx: oneshot::Sender<AuthDecision>,
}

impl ChannelReplyHandle {
    pub fn new() -> (Self, oneshot::Receiver<AuthDecision>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }
}

impl ReplyHandle for ChannelReplyHandle {
    fn reply(self: Box<Self>, decision: AuthDecision) -> Result<(), ReplyError> {
        self.tx.send(decision).map_err(|_| ReplyError::SourceGone)
    }
}
