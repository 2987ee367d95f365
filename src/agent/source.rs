//! Kernel event source reading JSON lines.
//!
//! Each line holds a [`SecurityEvent`] and, for events the kernel waits on, a
//! `request_id`. Decisions are written back as JSON lines on the reply writer.
//! Reviewers answer pending requests with [`ReviewLine`]s.

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use auth_coordinator::{AuthDecision, ReplyError, ReplyHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};
use vigil_core::SecurityEvent;

use super::{AgentHandle, KernelEvent};

#[derive(Debug, Deserialize)]
struct EventLine {
    #[serde(flatten)]
    event: SecurityEvent,
    #[serde(default)]
    request_id: Option<u64>,
}

/// Decision line written back to the kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLine {
    pub request_id: u64,
    pub decision: AuthDecision,
}

/// Reviewer answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewLine {
    pub request_id: u64,
    pub allowed: bool,
}

/// [`ReplyHandle`] writing the decision as a JSON line.
pub struct JsonReplyHandle<W> {
    request_id: u64,
    out: Arc<Mutex<W>>,
}

impl<W: Write + Send> ReplyHandle for JsonReplyHandle<W> {
    fn reply(self: Box<Self>, decision: AuthDecision) -> Result<(), ReplyError> {
        let line = serde_json::to_string(&DecisionLine {
            request_id: self.request_id,
            decision,
        })
        .map_err(std::io::Error::from)?;

        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// Read events from `input` and push them to the agent until end of input.
///
/// Returns the number of events read. Malformed lines are skipped.
pub async fn read_events<R, W>(
    input: R,
    events: mpsc::Sender<KernelEvent>,
    replies: Arc<Mutex<W>>,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send + 'static,
{
    let mut lines = input.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("reading kernel events")? {
        if line.trim().is_empty() {
            continue;
        }
        let EventLine { event, request_id } = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("skipping malformed event: {err}");
                continue;
            }
        };

        let mut kernel_event = KernelEvent::new(event);
        match request_id {
            Some(request_id) if kernel_event.event.kind.requires_authorization() => {
                let handle = JsonReplyHandle {
                    request_id,
                    out: Arc::clone(&replies),
                };
                kernel_event = kernel_event.with_authorization(request_id, Box::new(handle));
            }
            Some(request_id) => log::debug!(
                "request {request_id} ignored: {} events are not authorized",
                kernel_event.event.kind
            ),
            None => {}
        }

        if events.send(kernel_event).await.is_err() {
            log::debug!("agent stopped, closing the event source");
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Apply the reviewer decisions read from `input` until end of input.
///
/// Returns the number of decisions that answered a pending request. Late
/// answers are ignored, malformed lines are skipped.
pub async fn read_decisions<R>(input: R, agent: AgentHandle) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("reading reviewer decisions")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReviewLine>(&line) {
            Ok(ReviewLine {
                request_id,
                allowed,
            }) => {
                if agent.resolve(request_id, allowed) {
                    count += 1;
                }
            }
            Err(err) => log::warn!("skipping malformed decision: {err}"),
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use auth_coordinator::{AuthorizationCoordinator, ChannelReplyHandle};
    use event_router::{EventRouter, RouterConfig};
    use tokio::{io::BufReader, sync::watch};
    use vigil_core::{Bus, EventKind};

    use super::*;
    use crate::agent::AuthRequest;

    #[tokio::test]
    async fn reads_events_and_replies() {
        let input = concat!(
            r#"{"kind":"ProcessCreate","timestamp":1,"pid":10,"request_id":4}"#,
            "\n\nnot json\n",
            r#"{"kind":"FileCreate","timestamp":2,"pid":11,"path":"/tmp/a","request_id":5}"#,
            "\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let replies = Arc::new(Mutex::new(Vec::<u8>::new()));

        let count = read_events(BufReader::new(input.as_bytes()), tx, Arc::clone(&replies))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event.kind, EventKind::ProcessCreate);
        let AuthRequest { request_id, handle } = first.authorization.unwrap();
        assert_eq!(request_id, 4);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.event.path, "/tmp/a");
        assert!(second.authorization.is_none());
        assert!(rx.recv().await.is_none());

        handle.reply(AuthDecision::Deny).unwrap();
        let written = String::from_utf8(replies.lock().clone()).unwrap();
        assert_eq!(written, "{\"request_id\":4,\"decision\":\"deny\"}\n");
    }

    #[tokio::test]
    async fn reviewer_decisions_resolve_pending_requests() {
        let (_tx, router_config) = watch::channel(RouterConfig::default());
        let agent = AgentHandle {
            coordinator: Arc::new(AuthorizationCoordinator::default()),
            router: Arc::new(EventRouter::new(router_config, Bus::new())),
        };
        let (denied, denied_rx) = ChannelReplyHandle::new();
        let (allowed, allowed_rx) = ChannelReplyHandle::new();
        agent.coordinator.submit(7, Box::new(denied));
        agent.coordinator.submit(8, Box::new(allowed));

        let input = concat!(
            r#"{"request_id":7,"allowed":false}"#,
            "\n\nnot json\n",
            r#"{"request_id":8,"allowed":true}"#,
            "\n",
            r#"{"request_id":7,"allowed":true}"#,
            "\n",
        );
        let count = read_decisions(BufReader::new(input.as_bytes()), agent.clone())
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(denied_rx.await.unwrap(), AuthDecision::Deny);
        assert_eq!(allowed_rx.await.unwrap(), AuthDecision::Allow);
        assert_eq!(agent.pending_count(), 0);
    }
}
