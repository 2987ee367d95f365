//! Classification of enriched events.
//!
//! The [`EventRouter`] counts every event per category, keeps the unfiltered
//! audit history and forwards what the active preferences let through to the
//! display collaborators listening on the [`Bus`](vigil_core::Bus).

mod config;
mod counters;
mod router;

pub use config::{MuteRules, RouterConfig};
pub use counters::CategoryCounters;
pub use router::EventRouter;
