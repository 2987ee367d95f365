//! Shared building blocks of the vigil agent: the event model, the bus used to
//! hand routed events to display collaborators and typed configuration access.

pub mod bus;
pub mod config;
pub mod event;

pub use bus::{Bus, BusError, receive_from_broadcast};
pub use config::{ConfigError, SectionConfig};
pub use event::{Category, EventKind, ProcessMetadata, SecurityEvent};

pub use nix::unistd::Pid;

/// Utility function to pretty print an error with its sources.
///
/// We use this because by default Rust won't print the source of an error message,
/// making it much less useful. Instead of re-implementing that, we'll just use
/// anyhow as an error pretty-printer.
pub fn log_error<E: std::error::Error + Send + Sync + 'static>(msg: &str, err: E) {
    log::error!("{}: {:?}", msg, anyhow::Error::from(err));
}
