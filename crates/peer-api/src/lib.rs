//! Channel to the privileged peer.
//!
//! The peer runs with elevated privileges and answers the process queries the
//! agent is not allowed to perform itself. It listens on a unix socket and
//! speaks HTTP: [`server`] is the peer side, [`client`] the agent side.

pub mod client;
pub mod dto;
pub mod error;
pub mod server;

use std::time::Duration;

pub const DEFAULT_UDS: &str = "/var/run/vigil-peer.sock";

/// Time the peer has to answer a query.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_millis(2_000);
