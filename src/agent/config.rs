use std::time::Duration;

use auth_coordinator::DEFAULT_AUTH_TIMEOUT;
use peer_api::DEFAULT_PEER_TIMEOUT;
use vigil_core::{ConfigError, SectionConfig};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_ENRICH_CONCURRENCY: usize = 16;

/// Settings of the `[agent]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub auth_timeout: Duration,
    /// Capacity of the kernel event channel.
    pub queue_capacity: usize,
    /// Events enriched at the same time.
    pub enrich_concurrency: usize,
    pub use_peer: bool,
    pub peer_socket_path: Option<String>,
    /// Time the privileged peer has to answer one query.
    pub peer_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enrich_concurrency: DEFAULT_ENRICH_CONCURRENCY,
            use_peer: true,
            peer_socket_path: None,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

impl TryFrom<&SectionConfig> for AgentConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let auth_timeout_ms =
            config.with_default("auth_timeout_ms", DEFAULT_AUTH_TIMEOUT.as_millis() as u64)?;
        let peer_timeout_ms =
            config.with_default("peer_timeout_ms", DEFAULT_PEER_TIMEOUT.as_millis() as u64)?;
        Ok(Self {
            auth_timeout: Duration::from_millis(auth_timeout_ms),
            queue_capacity: positive(config, "queue_capacity", DEFAULT_QUEUE_CAPACITY)?,
            enrich_concurrency: positive(config, "enrich_concurrency", DEFAULT_ENRICH_CONCURRENCY)?,
            use_peer: config.with_default("use_peer", true)?,
            peer_socket_path: config.optional("peer_socket_path")?,
            peer_timeout: Duration::from_millis(peer_timeout_ms),
        })
    }
}

fn positive(config: &SectionConfig, field: &str, default: usize) -> Result<usize, ConfigError> {
    match config.with_default(field, default)? {
        0 => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            err: "value must be greater than zero".to_string(),
        }),
        value => Ok(value),
    }
}
