use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::event::SecurityEvent;

/// Broadcast channel carrying the events forwarded to the display collaborators.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Arc<SecurityEvent>>,
}

/// Describes a bus error.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus is stopped")]
    Stopped,
}

const BUFFER_SIZE: usize = 1000;

impl Bus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUFFER_SIZE);
        Self { tx }
    }

    /// Publish an event. Having no subscriber is not an error.
    pub fn send(&self, event: Arc<SecurityEvent>) {
        log::trace!(
            target: "event",
            "{} [{}:{}] {:?}",
            event.timestamp,
            event.pid,
            event.path,
            event.kind
        );

        let _ = self.tx.send(event);
    }

    pub fn get_receiver(&self) -> broadcast::Receiver<Arc<SecurityEvent>> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive an event from a [`broadcast::Receiver`]. Log a warning if we have lost messages.
pub async fn receive_from_broadcast(
    rx: &mut broadcast::Receiver<Arc<SecurityEvent>>,
    consumer: &str,
) -> Result<Arc<SecurityEvent>, BusError> {
    let mut lost: u64 = 0;
    loop {
        match rx.recv().await {
            Ok(value) => {
                if lost > 0 {
                    log::warn!(target: consumer, "broadcast channel lagged {lost} messages");
                }
                return Ok(value);
            }
            Err(RecvError::Lagged(lagged)) => lost += lagged,
            Err(RecvError::Closed) => return Err(BusError::Stopped),
        }
    }
}
