//! Diagnostic event feed
//!
//! The client and correlator publish what happens on the connection here.
//! Responses are never routed through this feed: callers get them from
//! [`crate::Correlator::execute`]; subscribers only observe.

use tokio::sync::broadcast;

/// Capacity of the broadcast buffer; slow subscribers lag past this
const EVENT_CAPACITY: usize = 64;

/// Events emitted for an Anova connection
#[derive(Debug, Clone, PartialEq)]
pub enum AnovaEvent {
    /// Transport is open and subscribed
    Connected,
    /// Transport closed, either on request or by the device
    Disconnected,
    /// A command completed with a response
    Response { command: String, response: String },
    /// A completed notification arrived with no command pending
    StaleNotification { payload: String },
}

/// Sender side of the event feed
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<AnovaEvent>,
}

impl EventSender {
    /// Create a new event feed
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody is listening
    pub fn emit(&self, event: AnovaEvent) {
        let _ = self.tx.send(event);
    }

    /// Get a receiver for events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AnovaEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
