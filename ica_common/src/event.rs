//! Structured events and the injected event sink.
//!
//! Every state-gate denial, timeout and unknown-reference acknowledgment is
//! reported as an [`Event`] to an [`EventSink`] handed to each component at
//! construction. Persistence is the sink's business, not the core's.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// Event codes reported by the dispatch core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventCode {
    /// Command rejected by the state gate or refused by its executor.
    CommandDenied = 100,
    /// No acknowledgment within the declared timeout.
    CommandTimeout = 101,
    /// Acknowledgment or timeout for a reference that is not pending.
    UnknownReference = 102,
    /// Device correlation pool full.
    PoolExhausted = 103,
    /// Peer of a channel has been torn down.
    ChannelClosed = 104,
    /// Command name has neither a local handler nor a route.
    NoRoute = 105,
    /// An init stage reported failure.
    InitStageFailed = 200,
    /// Availability state changed.
    AvailabilityChanged = 201,
    /// Operation state changed.
    OperationChanged = 202,
    /// Worker lifecycle transition.
    WorkerLifecycle = 203,
}

/// `{code, severity, free-text args}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub code: EventCode,
    pub severity: Severity,
    pub args: Vec<String>,
}

impl Event {
    pub fn new(code: EventCode, severity: Severity) -> Self {
        Self {
            code,
            severity,
            args: Vec::new(),
        }
    }

    /// Append one free-text argument.
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}) [{}]", self.code, self.code as u16, self.args.join(", "))
    }
}

/// Receiver of structured events.
pub trait EventSink: Send + Sync {
    fn report(&self, event: Event);
}

/// Shared sink handle, as injected into components.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn report(&self, event: Event) {
        let code = event.code as u16;
        match event.severity {
            Severity::Info => info!(code, args = ?event.args, "event {:?}", event.code),
            Severity::Warning => warn!(code, args = ?event.args, "event {:?}", event.code),
            Severity::Error | Severity::Fatal => {
                error!(code, severity = ?event.severity, args = ?event.args, "event {:?}", event.code)
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Number of recorded events with the given code.
    pub fn count(&self, code: EventCode) -> usize {
        self.events.lock().iter().filter(|e| e.code == code).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn report(&self, event: Event) {
        debug!("recorded {event}");
        self.events.lock().push(event);
    }
}

/// Fans every event out to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<SharedEventSink>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedEventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn report(&self, event: Event) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.report(event.clone());
            }
            last.report(event);
        }
    }
}
