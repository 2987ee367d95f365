use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use vigil_core::{Bus, Category, SecurityEvent};

use crate::{config::RouterConfig, counters::CategoryCounters};

/// Counts, records and forwards enriched events.
///
/// Events must be routed in arrival order. Counters and audit log are updated
/// before any filtering decision; the displayed view only keeps the forwarded
/// events, in the same relative order.
pub struct EventRouter {
    counters: RwLock<CategoryCounters>,
    audit: RwLock<Vec<Arc<SecurityEvent>>>,
    displayed: RwLock<Vec<Arc<SecurityEvent>>>,
    config: watch::Receiver<RouterConfig>,
    bus: Bus,
}

impl EventRouter {
    pub fn new(config: watch::Receiver<RouterConfig>, bus: Bus) -> Self {
        Self {
            counters: RwLock::new(CategoryCounters::default()),
            audit: RwLock::new(Vec::new()),
            displayed: RwLock::new(Vec::new()),
            config,
            bus,
        }
    }

    /// Route an event. Returns true if it was forwarded to the display.
    pub fn route(&self, event: SecurityEvent) -> bool {
        let event = Arc::new(event);
        self.counters.write().increment(Category::All);
        self.audit.write().push(Arc::clone(&event));

        let config = self.config.borrow();
        let Some(category) = classify(&config, &event) else {
            return false;
        };
        self.counters.write().increment(category);

        if !config.shows(category, &event) {
            return false;
        }
        drop(config);

        self.displayed.write().push(Arc::clone(&event));
        self.bus.send(event);
        true
    }

    /// Recompute the displayed view from the audit log with the current
    /// preferences. Counters are left untouched and nothing is sent on the bus.
    pub fn rebuild_view(&self) -> usize {
        let view: Vec<Arc<SecurityEvent>> = {
            let config = self.config.borrow();
            self.audit
                .read()
                .iter()
                .filter(|event| {
                    event
                        .kind
                        .category()
                        .filter(|category| {
                            *category != Category::Network || !config.mute.suppresses(event)
                        })
                        .is_some_and(|category| config.shows(category, event))
                })
                .cloned()
                .collect()
        };
        let len = view.len();
        *self.displayed.write() = view;
        log::debug!("displayed view rebuilt with {len} events");
        len
    }

    pub fn counters(&self) -> CategoryCounters {
        *self.counters.read()
    }

    pub fn count(&self, category: Category) -> u64 {
        self.counters.read().get(category)
    }

    pub fn audit_len(&self) -> usize {
        self.audit.read().len()
    }

    pub fn audit_snapshot(&self) -> Vec<Arc<SecurityEvent>> {
        self.audit.read().clone()
    }

    pub fn displayed_len(&self) -> usize {
        self.displayed.read().len()
    }

    pub fn displayed_snapshot(&self) -> Vec<Arc<SecurityEvent>> {
        self.displayed.read().clone()
    }

    /// Detail text of the displayed event at `row`.
    pub fn displayed_description(&self, row: usize) -> Option<String> {
        self.displayed.read().get(row).map(|event| event.to_string())
    }
}

/// Category counter to increment for `event`, or `None` if it's dropped.
fn classify(config: &RouterConfig, event: &SecurityEvent) -> Option<Category> {
    match event.kind.category() {
        Some(Category::Network) if config.mute.suppresses(event) => None,
        Some(category) => Some(category),
        None => {
            log::warn!("unknown event from process {} dropped", event.pid);
            None
        }
    }
}
