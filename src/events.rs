//! Event sink: how a run reports progress and results to its host.
//!
//! A run emits at most three events, all tagged with the context's
//! `queryId`:
//!
//! | Event | When | `data.message` |
//! |-------|------|----------------|
//! | *started*   | once, at run entry | [`STARTED_MESSAGE`] |
//! | *completed* | once, on success   | the model's answer, verbatim |
//! | *failed*    | once, on abort (if enabled) | error summary |
//!
//! `data` is the invocation context with `message` added, so every
//! passthrough field the host supplied comes back unchanged. A top-level
//! host field named `message` or `errorKind` is replaced by the event's own
//! value; `data` never carries a key twice.
//!
//! Sinks are fire-and-forget: methods return nothing, and a sink that cannot
//! deliver an event must not affect the run.

use crate::context::InvocationContext;
use crate::error::{ErrorKind, VqaError};
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Message carried by the *started* event.
pub const STARTED_MESSAGE: &str = "Image analysis agent started";

/// Which of the three events this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Completed,
    Failed,
}

/// Payload of an event: the echoed context plus a message.
///
/// Serialises as one flat object: the context's fields, then `message` and
/// (on failure) `errorKind`, which overwrite any same-named context field.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub context: InvocationContext,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
}

impl Serialize for EventData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = match serde_json::to_value(&self.context).map_err(S::Error::custom)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(kind) = &self.error_kind {
            let kind = serde_json::to_value(kind).map_err(S::Error::custom)?;
            fields.insert("errorKind".to_string(), kind);
        }
        fields.serialize(serializer)
    }
}

/// A single record delivered to an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub kind: EventKind,
    pub query_id: String,
    pub data: EventData,
}

impl AgentEvent {
    pub fn started(context: &InvocationContext) -> Self {
        Self::with_message(EventKind::Started, context, STARTED_MESSAGE.to_string(), None)
    }

    pub fn completed(context: &InvocationContext, answer: impl Into<String>) -> Self {
        Self::with_message(EventKind::Completed, context, answer.into(), None)
    }

    pub fn failed(context: &InvocationContext, error: &VqaError) -> Self {
        Self::with_message(
            EventKind::Failed,
            context,
            error.to_string(),
            Some(error.kind()),
        )
    }

    fn with_message(
        kind: EventKind,
        context: &InvocationContext,
        message: String,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            kind,
            query_id: context.query_id.clone(),
            data: EventData {
                context: context.clone(),
                message,
                error_kind,
            },
        }
    }

    /// The `data.message` field.
    pub fn message(&self) -> &str {
        &self.data.message
    }
}

/// Receives the events of a run.
///
/// Implementations must be `Send + Sync`: hosts may drive several runs
/// concurrently against the same sink.
pub trait EventSink: Send + Sync {
    /// Called once at run entry.
    fn emit_event_created(&self, event: AgentEvent);

    /// Called once when the model produced an answer.
    fn emit_query_completed(&self, event: AgentEvent);

    /// Called once when the run aborts. Default: dropped.
    fn emit_query_failed(&self, event: AgentEvent) {
        let _ = event;
    }
}

/// A sink that discards every event.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit_event_created(&self, _event: AgentEvent) {}
    fn emit_query_completed(&self, _event: AgentEvent) {}
}

/// Logs every event through `tracing`.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit_event_created(&self, event: AgentEvent) {
        info!(query_id = %event.query_id, "{}", event.message());
    }

    fn emit_query_completed(&self, event: AgentEvent) {
        info!(query_id = %event.query_id, answer = %event.message(), "Query completed");
    }

    fn emit_query_failed(&self, event: AgentEvent) {
        warn!(query_id = %event.query_id, "Query failed: {}", event.message());
    }
}

/// Forwards events into an unbounded Tokio channel.
///
/// ```rust
/// use edgequake_vqa::{AgentEvent, ChannelEventSink, EventSink, InvocationContext};
///
/// let (sink, mut rx) = ChannelEventSink::new();
/// let ctx = InvocationContext::new("q-7", "http://h/1.png", "What is it?");
/// sink.emit_event_created(AgentEvent::started(&ctx));
/// assert_eq!(rx.try_recv().unwrap().query_id, "q-7");
/// ```
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            warn!("Event receiver dropped; event discarded");
        }
    }
}

impl EventSink for ChannelEventSink {
    fn emit_event_created(&self, event: AgentEvent) {
        self.send(event);
    }

    fn emit_query_completed(&self, event: AgentEvent) {
        self.send(event);
    }

    fn emit_query_failed(&self, event: AgentEvent) {
        self.send(event);
    }
}
