use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::task::AbortHandle;

use crate::reply::{AuthDecision, ReplyHandle};

/// Time a reviewer has to answer before the request is allowed.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(30_000);

struct PendingAuthorization {
    generation: u64,
    handle: Box<dyn ReplyHandle>,
    timer: AbortHandle,
}

impl PendingAuthorization {
    /// Stop the timer and hand over the reply handle.
    fn into_handle(self) -> Box<dyn ReplyHandle> {
        self.timer.abort();
        self.handle
    }
}

type PendingMap = RwLock<HashMap<u64, PendingAuthorization>>;

/// Correlates in-flight kernel authorization requests with their reply handle.
///
/// Every submitted request is answered exactly once: by an explicit
/// [`resolve`](Self::resolve), by the timeout which allows it, or by
/// [`drain_all`](Self::drain_all) on shutdown. Handles are moved out of the
/// pending map before being answered, so whoever removes an entry is the only
/// one able to reply.
pub struct AuthorizationCoordinator {
    pending: Arc<PendingMap>,
    generation: AtomicU64,
    timeout: Duration,
}

impl AuthorizationCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a pending request and schedule its default decision.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request_id: u64, handle: Box<dyn ReplyHandle>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.write();
        if pending.contains_key(&request_id) {
            drop(pending);
            log::warn!(
                "authorization request {request_id} is already pending, allowing the duplicate"
            );
            deliver(request_id, handle, AuthDecision::Allow);
            return;
        }

        // The timer can't see the entry before the write lock is released
        let timer = tokio::spawn(expire(
            Arc::clone(&self.pending),
            request_id,
            generation,
            self.timeout,
        ));
        pending.insert(
            request_id,
            PendingAuthorization {
                generation,
                handle,
                timer: timer.abort_handle(),
            },
        );
    }

    /// Answer a pending request.
    ///
    /// Returns false if the request was not pending anymore: it was already
    /// answered, explicitly or by its timeout.
    pub fn resolve(&self, request_id: u64, allowed: bool) -> bool {
        let entry = self.pending.write().remove(&request_id);
        match entry {
            Some(entry) => {
                deliver(
                    request_id,
                    entry.into_handle(),
                    AuthDecision::from_allowed(allowed),
                );
                true
            }
            None => {
                log::debug!("authorization request {request_id} already resolved");
                false
            }
        }
    }

    /// Allow every pending request and clear the pending set.
    pub fn drain_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.write());
        let count = drained.len();
        if count > 0 {
            log::info!("allowing {count} pending authorization requests");
        }
        for (request_id, entry) in drained {
            deliver(request_id, entry.into_handle(), AuthDecision::Allow);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.pending.read().contains_key(&request_id)
    }
}

impl Default for AuthorizationCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_TIMEOUT)
    }
}

/// Allow `request_id` after `timeout` unless it was answered meanwhile.
async fn expire(pending: Arc<PendingMap>, request_id: u64, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let expired = {
        let mut pending = pending.write();
        match pending.get(&request_id) {
            Some(entry) if entry.generation == generation => pending.remove(&request_id),
            _ => None,
        }
    };
    if let Some(entry) = expired {
        log::info!(
            "authorization request {request_id} not answered in {}ms, allowing",
            timeout.as_millis()
        );
        deliver(request_id, entry.handle, AuthDecision::Allow);
    }
}

fn deliver(request_id: u64, handle: Box<dyn ReplyHandle>, decision: AuthDecision) {
    match handle.reply(decision) {
        Ok(()) => log::debug!("authorization request {request_id}: {decision}"),
        Err(err) => log::error!(
            "delivering {decision} for authorization request {request_id} failed: {err}"
        ),
    }
}
