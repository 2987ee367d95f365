//! Vigil is a host security agent. It receives process, file and network
//! events from a kernel event source, enriches them with process metadata,
//! holds process creations until a reviewer allows or denies them and routes
//! everything to the display collaborators.
//!
//! The agent ships as two binaries:
//!
//! - `vigild`, the [agent](crate::agent::SecurityAgent) itself, running with
//!   the privileges of the user it monitors for
//! - `vigil-peer`, a small privileged service the agent escalates to when a
//!   metadata query is denied
//!
//! ```sh
//! # Execute the privileged peer
//! sudo vigil-peer
//!
//! # Feed the agent JSON kernel events from stdin
//! vigild --events -
//! ```
//!
//! ## Pipeline
//!
//! Kernel events are pushed into a bounded channel. Each event is enriched by
//! the [metadata extractor](metadata_extractor), authorization requests are
//! handed to the [coordinator](auth_coordinator) which allows them if nobody
//! answers in time, then the [router](event_router) counts, records and
//! forwards the event on the [bus](vigil_core::bus).

pub mod agent;
pub mod cli;
pub mod config;
pub mod console;
pub mod peer;
pub mod vigild;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
