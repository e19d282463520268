use crate::core::record::{InboundRecord, OutboundRecord};
use crate::core::session::SessionState;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Destination for everything a session produces.
///
/// Implemented by the presentation layer. Callbacks may be invoked from the
/// read worker thread and must not block; a panicking sink loses the event
/// but never affects the session.
pub trait EventSink: Send + Sync {
    fn on_record(&self, record: InboundRecord);

    fn on_state_change(&self, state: SessionState, reason: Option<String>);

    fn on_sent(&self, record: OutboundRecord);
}

/// Invoke a sink callback, containing any panic it raises
pub(crate) fn dispatch<F>(sink: &dyn EventSink, event: F)
where
    F: FnOnce(&dyn EventSink),
{
    if panic::catch_unwind(AssertUnwindSafe(|| event(sink))).is_err() {
        warn!("Event sink panicked; event dropped");
    }
}

/// Session event as carried over a channel
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Received(InboundRecord),
    Sent(OutboundRecord),
    StateChanged {
        state: SessionState,
        reason: Option<String>,
    },
}

/// Sink that forwards events into an unbounded channel, for consumers on
/// another task or thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_record(&self, record: InboundRecord) {
        self.forward(SessionEvent::Received(record));
    }

    fn on_state_change(&self, state: SessionState, reason: Option<String>) {
        self.forward(SessionEvent::StateChanged { state, reason });
    }

    fn on_sent(&self, record: OutboundRecord) {
        self.forward(SessionEvent::Sent(record));
    }
}

/// Entry retained by a [`RecordLog`]
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Received(InboundRecord),
    Sent(OutboundRecord),
}

#[derive(Debug)]
struct LogInner {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    state: SessionState,
    last_reason: Option<String>,
}

/// Bounded in-memory history of a session, for hosts that poll state
/// instead of reacting to callbacks. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct RecordLog {
    inner: Arc<Mutex<LogInner>>,
}

impl RecordLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                capacity,
                entries: VecDeque::with_capacity(capacity.min(1024)),
                state: SessionState::Closed,
                last_reason: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: LogEntry) {
        let mut inner = self.lock();
        if inner.entries.len() >= inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn received(&self) -> Vec<InboundRecord> {
        self.lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Received(record) => Some(record.clone()),
                LogEntry::Sent(_) => None,
            })
            .collect()
    }

    /// All retained received text, concatenated in arrival order
    pub fn received_text(&self) -> String {
        self.lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Received(record) => Some(record.text()),
                LogEntry::Sent(_) => None,
            })
            .collect()
    }

    /// All retained sent text, concatenated in send order
    pub fn sent_text(&self) -> String {
        self.lock()
            .entries
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Sent(record) => Some(record.text()),
                LogEntry::Received(_) => None,
            })
            .collect()
    }

    /// Last state reported by the session
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Reason attached to the most recent state change, if any
    pub fn last_reason(&self) -> Option<String> {
        self.lock().last_reason.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl EventSink for RecordLog {
    fn on_record(&self, record: InboundRecord) {
        self.push(LogEntry::Received(record));
    }

    fn on_state_change(&self, state: SessionState, reason: Option<String>) {
        let mut inner = self.lock();
        inner.state = state;
        inner.last_reason = reason;
    }

    fn on_sent(&self, record: OutboundRecord) {
        self.push(LogEntry::Sent(record));
    }
}

/// Sink that forwards every event to each of its members in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_record(&self, record: InboundRecord) {
        for sink in &self.sinks {
            let record = record.clone();
            dispatch(sink.as_ref(), |s| s.on_record(record));
        }
    }

    fn on_state_change(&self, state: SessionState, reason: Option<String>) {
        for sink in &self.sinks {
            let reason = reason.clone();
            dispatch(sink.as_ref(), |s| s.on_state_change(state, reason));
        }
    }

    fn on_sent(&self, record: OutboundRecord) {
        for sink in &self.sinks {
            let record = record.clone();
            dispatch(sink.as_ref(), |s| s.on_sent(record));
        }
    }
}
