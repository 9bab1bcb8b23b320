//! Viewport-scoped live subscription, as an explicit state machine.
//!
//! The client performs no IO. Each input (socket event, timer, viewport
//! change) returns the [`Command`]s a driver must execute. Every connection
//! attempt gets a fresh [`Generation`]; inputs tagged with an older generation
//! belong to a superseded connection and never reach the [`TargetStore`].
//!
//! There is no server verb to move an existing subscription, so a viewport
//! change closes the current connection and opens a new one.

use std::sync::Arc;
use std::time::Duration;

use foundation::{Generation, Viewport};
use runtime::metrics::{
    CONNECTIONS_OPENED, FEATURES_SKIPPED, MESSAGES_APPLIED, MESSAGES_DROPPED, MESSAGES_STALE,
    RECONNECTS_SCHEDULED, SNAPSHOT_SIZE, TARGETS,
};
use runtime::{Backoff, Observation, Observer, SharedMetrics};
use tracing::debug;

use crate::config::ClientConfig;
use crate::protocol::{SubscriptionRequest, decode_snapshot};
use crate::state::ConnectionState;
use crate::store::TargetStore;
use crate::target::Snapshot;

/// Side effects requested by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a socket to the configured endpoint for this generation.
    Connect { generation: Generation },
    /// Report `on_connect_timeout(generation)` after the delay.
    ArmConnectTimeout {
        generation: Generation,
        after: Duration,
    },
    /// Send a text frame on this generation's socket.
    Send { generation: Generation, text: String },
    /// Close and forget this generation's socket.
    Close { generation: Generation },
    /// Report `on_reconnect_due(generation)` after the delay.
    ScheduleReconnect {
        generation: Generation,
        after: Duration,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error("unexpected {event} while {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: ConnectionState,
    },
    #[error("no viewport to subscribe with")]
    NoViewport,
    #[error("failed to encode subscription: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Commands = Result<Vec<Command>, ClientError>;

pub struct SubscriptionClient {
    state: ConnectionState,
    generation: Generation,
    viewport: Option<Viewport>,
    request: Option<SubscriptionRequest>,
    attempts: u32,
    connect_timeout: Duration,
    backoff: Backoff,
    store: TargetStore,
    observer: Arc<dyn Observer>,
    metrics: SharedMetrics,
}

impl SubscriptionClient {
    pub fn new(
        config: &ClientConfig,
        store: TargetStore,
        observer: Arc<dyn Observer>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: Generation::default(),
            viewport: None,
            request: None,
            attempts: 0,
            connect_timeout: config.connect_timeout(),
            backoff: config.backoff(),
            store,
            observer,
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Last known viewport; reconnects resubscribe with it.
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Consecutive failed attempts since the last applied snapshot.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn store(&self) -> &TargetStore {
        &self.store
    }

    pub fn start(&mut self, initial: Viewport) -> Commands {
        if self.state != ConnectionState::Idle || self.generation != Generation::default() {
            return Err(ClientError::IllegalTransition {
                from: self.state,
                to: ConnectionState::Connecting,
            });
        }
        self.viewport = Some(initial);
        let mut out = Vec::new();
        self.connect(&mut out)?;
        Ok(out)
    }

    pub fn on_viewport_changed(&mut self, viewport: Viewport) -> Commands {
        let mut out = Vec::new();
        if self.state.is_active() && self.viewport == Some(viewport) {
            debug!(generation = %self.generation, "viewport unchanged, keeping subscription");
            return Ok(out);
        }
        self.viewport = Some(viewport);

        match self.state {
            ConnectionState::Connecting | ConnectionState::Subscribed => {
                let old = self.generation;
                self.transition(ConnectionState::Closing)?;
                out.push(Command::Close { generation: old });
                self.transition(ConnectionState::Idle)?;
                self.attempts = 0;
                self.connect(&mut out)?;
            }
            ConnectionState::Errored => {
                // The new generation makes any scheduled reconnect stale.
                self.attempts = 0;
                self.connect(&mut out)?;
            }
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                debug!(state = %self.state, "recorded viewport {viewport}");
            }
        }
        Ok(out)
    }

    pub fn on_open(&mut self, generation: Generation) -> Commands {
        if generation != self.generation {
            debug!(%generation, current = %self.generation, "superseded connection opened, closing it");
            return Ok(vec![Command::Close { generation }]);
        }
        match self.state {
            ConnectionState::Connecting => {}
            ConnectionState::Errored | ConnectionState::Closing | ConnectionState::Closed => {
                return Ok(vec![Command::Close { generation }]);
            }
            state => {
                return Err(ClientError::UnexpectedEvent {
                    event: "open",
                    state,
                });
            }
        }

        let request = self.request.clone().ok_or(ClientError::NoViewport)?;
        let text = request.encode()?;
        self.transition(ConnectionState::Subscribed)?;
        self.metrics.inc(CONNECTIONS_OPENED);
        self.observer
            .observe(&Observation::ConnectionOpened { generation });
        self.observer.observe(&Observation::Subscribed {
            generation,
            viewport: request.viewport,
        });
        Ok(vec![Command::Send { generation, text }])
    }

    pub fn on_message(&mut self, generation: Generation, raw: &str) -> Commands {
        if generation != self.generation {
            self.metrics.inc(MESSAGES_STALE);
            debug!(%generation, current = %self.generation, "dropping message from superseded connection");
            return Ok(Vec::new());
        }
        match self.state {
            ConnectionState::Subscribed => {}
            ConnectionState::Closing | ConnectionState::Errored => {
                self.metrics.inc(MESSAGES_STALE);
                return Ok(Vec::new());
            }
            state => {
                return Err(ClientError::UnexpectedEvent {
                    event: "message",
                    state,
                });
            }
        }

        match decode_snapshot(raw) {
            Ok(decoded) => {
                if decoded.skipped > 0 {
                    debug!(%generation, skipped = decoded.skipped, "skipped unusable features");
                    self.metrics.add(FEATURES_SKIPPED, decoded.skipped as u64);
                }
                let count = decoded.targets.len() as i64;
                let revision = self.store.apply(Snapshot::new(generation, decoded.targets));
                // A connection only counts as healthy once it has delivered data.
                self.attempts = 0;
                self.metrics.inc(MESSAGES_APPLIED);
                self.metrics.set_gauge(TARGETS, count);
                self.metrics.record(SNAPSHOT_SIZE, count);
                debug!(%generation, revision, targets = count, "applied snapshot");
            }
            Err(err) => {
                self.metrics.inc(MESSAGES_DROPPED);
                self.observer.observe(&Observation::MessageDropped {
                    generation,
                    reason: err.to_string(),
                });
            }
        }
        Ok(Vec::new())
    }

    pub fn on_error(&mut self, generation: Generation, reason: &str) -> Commands {
        if generation != self.generation {
            debug!(%generation, "error on superseded connection: {reason}");
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        match self.state {
            ConnectionState::Connecting | ConnectionState::Subscribed => {
                self.fail(reason.to_string(), &mut out)?;
            }
            ConnectionState::Errored | ConnectionState::Closing | ConnectionState::Closed => {
                debug!(%generation, state = %self.state, "late error: {reason}");
            }
            ConnectionState::Idle => {
                return Err(ClientError::UnexpectedEvent {
                    event: "error",
                    state: self.state,
                });
            }
        }
        Ok(out)
    }

    pub fn on_close(&mut self, generation: Generation, code: u16, reason: &str) -> Commands {
        if generation != self.generation {
            // Teardown we started for a viewport change; the new generation is already underway.
            self.observer.observe(&Observation::Closed {
                generation,
                code,
                reason: reason.to_string(),
            });
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        match self.state {
            ConnectionState::Closing => {
                self.observe_closed(generation, code, reason);
                self.transition(ConnectionState::Closed)?;
            }
            ConnectionState::Connecting | ConnectionState::Subscribed => {
                self.observe_closed(generation, code, reason);
                let reason = if reason.is_empty() {
                    format!("connection closed unexpectedly ({code})")
                } else {
                    format!("connection closed unexpectedly ({code}): {reason}")
                };
                self.fail(reason, &mut out)?;
            }
            ConnectionState::Errored | ConnectionState::Closed => {
                self.observe_closed(generation, code, reason);
            }
            ConnectionState::Idle => {
                return Err(ClientError::UnexpectedEvent {
                    event: "close",
                    state: self.state,
                });
            }
        }
        Ok(out)
    }

    pub fn on_connect_timeout(&mut self, generation: Generation) -> Commands {
        let mut out = Vec::new();
        if generation == self.generation && self.state == ConnectionState::Connecting {
            let reason = format!(
                "connect timed out after {:.1}s",
                self.connect_timeout.as_secs_f64()
            );
            self.fail(reason, &mut out)?;
        }
        Ok(out)
    }

    pub fn on_reconnect_due(&mut self, generation: Generation) -> Commands {
        let mut out = Vec::new();
        if generation == self.generation && self.state == ConnectionState::Errored {
            self.connect(&mut out)?;
        } else {
            debug!(%generation, state = %self.state, "reconnect no longer needed");
        }
        Ok(out)
    }

    /// Shuts the client down for good; no reconnect follows.
    pub fn stop(&mut self) -> Commands {
        let mut out = Vec::new();
        match self.state {
            ConnectionState::Connecting | ConnectionState::Subscribed => {
                self.transition(ConnectionState::Closing)?;
                out.push(Command::Close {
                    generation: self.generation,
                });
            }
            ConnectionState::Idle | ConnectionState::Errored => {
                self.transition(ConnectionState::Closed)?;
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
        Ok(out)
    }

    fn connect(&mut self, out: &mut Vec<Command>) -> Result<(), ClientError> {
        let viewport = self.viewport.ok_or(ClientError::NoViewport)?;
        self.transition(ConnectionState::Connecting)?;
        self.generation = self.generation.next();
        self.request = Some(SubscriptionRequest::new(self.generation, viewport));
        debug!(generation = %self.generation, %viewport, "connecting");
        out.push(Command::Connect {
            generation: self.generation,
        });
        out.push(Command::ArmConnectTimeout {
            generation: self.generation,
            after: self.connect_timeout,
        });
        Ok(())
    }

    fn fail(&mut self, reason: String, out: &mut Vec<Command>) -> Result<(), ClientError> {
        let generation = self.generation;
        self.transition(ConnectionState::Errored)?;
        self.observer.observe(&Observation::Error {
            generation,
            reason: reason.clone(),
        });
        out.push(Command::Close { generation });

        self.attempts += 1;
        match self.backoff.delay(self.attempts) {
            Some(after) => {
                self.metrics.inc(RECONNECTS_SCHEDULED);
                self.observer.observe(&Observation::ReconnectScheduled {
                    generation,
                    attempt: self.attempts,
                    delay: after,
                });
                out.push(Command::ScheduleReconnect { generation, after });
            }
            None => {
                self.observer.observe(&Observation::PersistentFailure {
                    attempts: self.attempts - 1,
                    reason,
                });
            }
        }
        Ok(())
    }

    fn observe_closed(&self, generation: Generation, code: u16, reason: &str) {
        self.observer.observe(&Observation::Closed {
            generation,
            code,
            reason: reason.to_string(),
        });
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), ClientError> {
        if !self.state.can_transition_to(to) {
            return Err(ClientError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        debug!(generation = %self.generation, "{} -> {to}", self.state);
        self.state = to;
        Ok(())
    }
}
