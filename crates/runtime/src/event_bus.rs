use std::time::Duration;

use foundation::{Generation, Viewport};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Connection lifecycle and input-quality events surfaced by the live client.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    ConnectionOpened {
        generation: Generation,
    },
    Subscribed {
        generation: Generation,
        viewport: Viewport,
    },
    Error {
        generation: Generation,
        reason: String,
    },
    Closed {
        generation: Generation,
        code: u16,
        reason: String,
    },
    ReconnectScheduled {
        generation: Generation,
        attempt: u32,
        delay: Duration,
    },
    /// Retries are exhausted; the client stays errored until the view changes.
    PersistentFailure {
        attempts: u32,
        reason: String,
    },
    MessageDropped {
        generation: Generation,
        reason: String,
    },
    ViewportRejected {
        reason: String,
    },
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::ConnectionOpened { .. } => "connection_opened",
            Observation::Subscribed { .. } => "subscribed",
            Observation::Error { .. } => "error",
            Observation::Closed { .. } => "closed",
            Observation::ReconnectScheduled { .. } => "reconnect_scheduled",
            Observation::PersistentFailure { .. } => "persistent_failure",
            Observation::MessageDropped { .. } => "message_dropped",
            Observation::ViewportRejected { .. } => "viewport_rejected",
        }
    }
}

/// Sink for observations. Implementations must not block.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &Observation);
}

/// Forwards observations to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &Observation) {
        match event {
            Observation::ConnectionOpened { generation } => {
                info!(%generation, "connection opened")
            }
            Observation::Subscribed {
                generation,
                viewport,
            } => info!(%generation, %viewport, "subscribed"),
            Observation::Error { generation, reason } => {
                warn!(%generation, "connection error: {reason}")
            }
            Observation::Closed {
                generation,
                code,
                reason,
            } => info!(%generation, code, "connection closed: {reason}"),
            Observation::ReconnectScheduled {
                generation,
                attempt,
                delay,
            } => info!(
                %generation,
                attempt,
                "reconnect scheduled in {:.1}s",
                delay.as_secs_f64()
            ),
            Observation::PersistentFailure { attempts, reason } => {
                warn!(attempts, "giving up reconnecting: {reason}")
            }
            Observation::MessageDropped { generation, reason } => {
                debug!(%generation, "dropped message: {reason}")
            }
            Observation::ViewportRejected { reason } => warn!("rejected viewport: {reason}"),
        }
    }
}

/// Recorded observation with its arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub observation: Observation,
}

/// In-memory observer that keeps every event, for inspection and tests.
#[derive(Debug, Default)]
pub struct EventBus {
    events: Mutex<Vec<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .map(|e| e.observation.kind())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.observation.kind() == kind)
            .count()
    }
}

impl Observer for EventBus {
    fn observe(&self, event: &Observation) {
        let mut events = self.events.lock();
        let seq = events.len() as u64;
        events.push(Event {
            seq,
            observation: event.clone(),
        });
    }
}
