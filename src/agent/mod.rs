//! The security agent: wires metadata extraction, authorization and routing
//! around the kernel event channel.

use std::{
    future::Future,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use auth_coordinator::{AuthorizationCoordinator, ReplyHandle};
use event_router::{CategoryCounters, EventRouter, RouterConfig};
use futures::{StreamExt, stream};
use metadata_extractor::{MetadataExtractor, MetadataSource};
use tokio::sync::{mpsc, watch};
use vigil_core::{Bus, SecurityEvent};

mod config;
pub mod source;

pub use config::{AgentConfig, DEFAULT_ENRICH_CONCURRENCY, DEFAULT_QUEUE_CAPACITY};

/// Authorization the kernel source is waiting for.
pub struct AuthRequest {
    pub request_id: u64,
    pub handle: Box<dyn ReplyHandle>,
}

/// Event pushed by the kernel source.
pub struct KernelEvent {
    pub event: SecurityEvent,
    pub authorization: Option<AuthRequest>,
}

impl KernelEvent {
    pub fn new(event: SecurityEvent) -> Self {
        Self {
            event,
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, request_id: u64, handle: Box<dyn ReplyHandle>) -> Self {
        self.authorization = Some(AuthRequest { request_id, handle });
        self
    }
}

/// Why [`SecurityAgent::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// The kernel event channel was closed.
    ConnectionLost,
    /// Shutdown was requested.
    Shutdown,
}

/// Composition root of the agent.
///
/// Owns its components: several agents can live in the same process.
pub struct SecurityAgent<L, D> {
    config: AgentConfig,
    extractor: MetadataExtractor<L, D>,
    coordinator: Arc<AuthorizationCoordinator>,
    router: Arc<EventRouter>,
    router_config: watch::Receiver<RouterConfig>,
    bus: Bus,
}

impl<L: MetadataSource, D: MetadataSource> SecurityAgent<L, D> {
    pub fn new(
        config: AgentConfig,
        extractor: MetadataExtractor<L, D>,
        router_config: watch::Receiver<RouterConfig>,
    ) -> Self {
        let bus = Bus::new();
        let coordinator = Arc::new(AuthorizationCoordinator::new(config.auth_timeout));
        let router = Arc::new(EventRouter::new(router_config.clone(), bus.clone()));
        Self {
            config,
            extractor,
            coordinator,
            router,
            router_config,
            bus,
        }
    }

    /// Channel the kernel source pushes events into.
    pub fn channel(&self) -> (mpsc::Sender<KernelEvent>, mpsc::Receiver<KernelEvent>) {
        mpsc::channel(self.config.queue_capacity)
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            coordinator: Arc::clone(&self.coordinator),
            router: Arc::clone(&self.router),
        }
    }

    /// Bus receiving the forwarded events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Process kernel events until the channel is closed or `shutdown` completes.
    ///
    /// Authorization requests are submitted on arrival. Events are enriched
    /// concurrently but routed in arrival order. On shutdown the events
    /// already queued are still processed. In both cases every pending
    /// authorization is allowed before returning.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<KernelEvent>,
        shutdown: impl Future<Output = ()> + Send,
    ) -> AgentExit {
        let stopping = AtomicBool::new(false);
        let mut shutdown = Box::pin(shutdown);
        let incoming = stream::poll_fn(|cx| {
            if !stopping.load(Ordering::Relaxed) && shutdown.as_mut().poll(cx).is_ready() {
                log::info!("shutdown requested, processing queued events");
                stopping.store(true, Ordering::Relaxed);
                events.close();
            }
            events.poll_recv(cx)
        });

        {
            let mut enriched = pin!(
                incoming
                    .map(|kernel_event: KernelEvent| {
                        let mut event = self.accept(kernel_event);
                        async move {
                            self.extractor.enrich(&mut event).await;
                            event
                        }
                    })
                    .buffered(self.config.enrich_concurrency)
            );

            let mut router_config = self.router_config.clone();
            let mut live_config = true;
            loop {
                tokio::select! {
                    next = enriched.next() => match next {
                        Some(event) => {
                            self.router.route(event);
                        }
                        None => break,
                    },
                    changed = router_config.changed(), if live_config => match changed {
                        Ok(()) => {
                            self.router.rebuild_view();
                        }
                        Err(_) => live_config = false,
                    },
                }
            }
        }

        let drained = self.coordinator.drain_all();
        log::debug!("{drained} pending authorizations allowed on exit");

        if stopping.load(Ordering::Relaxed) {
            AgentExit::Shutdown
        } else {
            AgentExit::ConnectionLost
        }
    }

    /// Start the authorization deadline as soon as the event is taken off the
    /// channel, before any metadata query can delay it.
    fn accept(&self, kernel_event: KernelEvent) -> SecurityEvent {
        let KernelEvent {
            event,
            authorization,
        } = kernel_event;
        if let Some(AuthRequest { request_id, handle }) = authorization {
            self.coordinator.submit(request_id, handle);
        }
        event
    }
}

/// Access to a running agent for reviewers and display collaborators.
#[derive(Clone)]
pub struct AgentHandle {
    coordinator: Arc<AuthorizationCoordinator>,
    router: Arc<EventRouter>,
}

impl AgentHandle {
    /// Answer an authorization request. Returns false if it was already answered.
    pub fn resolve(&self, request_id: u64, allowed: bool) -> bool {
        self.coordinator.resolve(request_id, allowed)
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.coordinator.is_pending(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.coordinator.pending_count()
    }

    pub fn counters(&self) -> CategoryCounters {
        self.router.counters()
    }

    pub fn audit_len(&self) -> usize {
        self.router.audit_len()
    }

    pub fn displayed_len(&self) -> usize {
        self.router.displayed_len()
    }

    pub fn displayed_description(&self, row: usize) -> Option<String> {
        self.router.displayed_description(row)
    }

    pub fn audit_snapshot(&self) -> Vec<Arc<SecurityEvent>> {
        self.router.audit_snapshot()
    }
}
