//! Correlation of kernel authorization requests with reviewer decisions.
//!
//! Requests not answered within the configured budget are allowed: a slow or
//! missing reviewer must never stall process creation on the host.

mod coordinator;
mod reply;

pub use coordinator::{AuthorizationCoordinator, DEFAULT_AUTH_TIMEOUT};
pub use reply::{AuthDecision, ChannelReplyHandle, ReplyError, ReplyHandle};
