//! Runs the subscription state machine against real sockets and timers.
//!
//! A single task owns the [`SubscriptionClient`] and [`ViewportTracker`] and
//! handles renderer input, socket events and timers one at a time, so the
//! state machine never sees concurrent mutation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use foundation::{Generation, Viewport};
use runtime::metrics::VIEWPORTS_REJECTED;
use runtime::{MetricsSnapshot, Observation, Observer, SharedMetrics};
use streaming::{
    ClientConfig, Command, Commands, ConnectionState, ReportOutcome, Snapshot,
    SubscriptionClient, TargetStore, ViewportTracker,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{self, SocketEvent, SocketHandle};

/// Close code used when this side tears a socket down.
const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, PartialEq)]
enum Input {
    Report([[f64; 2]; 2]),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    ConnectTimeout,
    ReconnectDue,
}

/// Renderer-facing handle to a running live client.
#[derive(Clone)]
pub struct LiveHandle {
    inputs: mpsc::UnboundedSender<Input>,
    store: TargetStore,
    metrics: SharedMetrics,
}

impl LiveHandle {
    /// Reports the settled visible region as `[[lon, lat], [lon, lat]]`.
    pub fn report(&self, corners: [[f64; 2]; 2]) {
        if self.inputs.send(Input::Report(corners)).is_err() {
            debug!("live client stopped, report ignored");
        }
    }

    pub fn stop(&self) {
        let _ = self.inputs.send(Input::Stop);
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.store.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.store.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Starts the live client on the current tokio runtime.
///
/// The returned task completes once the client has been stopped (explicitly
/// or by dropping every handle).
pub fn spawn(
    config: ClientConfig,
    observer: Arc<dyn Observer>,
) -> anyhow::Result<(LiveHandle, JoinHandle<()>)> {
    let initial = Viewport::from_array(config.initial_viewport)
        .with_context(|| format!("invalid initial viewport {:?}", config.initial_viewport))?;

    let store = TargetStore::new();
    let metrics = SharedMetrics::new();
    let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
    let (socket_tx, socket_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let driver = Driver {
        endpoint: config.endpoint.clone(),
        client: SubscriptionClient::new(&config, store.clone(), observer.clone(), metrics.clone()),
        tracker: ViewportTracker::new(initial, config.min_report_interval()),
        sockets: HashMap::new(),
        socket_tx,
        timer_tx,
        observer,
        metrics: metrics.clone(),
    };
    let task = tokio::spawn(driver.run(inputs_rx, socket_rx, timer_rx));

    let handle = LiveHandle {
        inputs: inputs_tx,
        store,
        metrics,
    };
    Ok((handle, task))
}

struct Driver {
    endpoint: String,
    client: SubscriptionClient,
    tracker: ViewportTracker,
    sockets: HashMap<Generation, SocketHandle>,
    socket_tx: transport::SocketEvents,
    timer_tx: mpsc::UnboundedSender<(Generation, Timer)>,
    observer: Arc<dyn Observer>,
    metrics: SharedMetrics,
}

impl Driver {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        mut socket_rx: mpsc::UnboundedReceiver<(Generation, SocketEvent)>,
        mut timer_rx: mpsc::UnboundedReceiver<(Generation, Timer)>,
    ) {
        info!(endpoint = %self.endpoint, viewport = %self.tracker.current(), "live client starting");
        let started = self.client.start(self.tracker.current());
        self.execute(started);

        let mut stopped = false;
        while self.client.state() != ConnectionState::Closed {
            let deadline = self.tracker.next_deadline();
            tokio::select! {
                input = inputs.recv(), if !stopped => match input {
                    Some(Input::Report(corners)) => self.report(corners),
                    Some(Input::Stop) | None => {
                        stopped = true;
                        let result = self.client.stop();
                        self.execute(result);
                    }
                },
                Some((generation, event)) = socket_rx.recv() => self.on_socket(generation, event),
                Some((generation, timer)) = timer_rx.recv() => {
                    let result = match timer {
                        Timer::ConnectTimeout => self.client.on_connect_timeout(generation),
                        Timer::ReconnectDue => self.client.on_reconnect_due(generation),
                    };
                    self.execute(result);
                }
                _ = sleep_until(deadline) => {
                    if let Some(viewport) = self.tracker.poll(Instant::now()) {
                        let result = self.client.on_viewport_changed(viewport);
                        self.execute(result);
                    }
                }
            }
        }

        for (_, socket) in self.sockets.drain() {
            socket.close();
        }
        info!("live client stopped");
    }

    fn report(&mut self, corners: [[f64; 2]; 2]) {
        match self.tracker.report(corners, Instant::now()) {
            ReportOutcome::Changed(viewport) => {
                let result = self.client.on_viewport_changed(viewport);
                self.execute(result);
            }
            ReportOutcome::Rejected(err) => {
                self.metrics.inc(VIEWPORTS_REJECTED);
                self.observer.observe(&Observation::ViewportRejected {
                    reason: err.to_string(),
                });
            }
            ReportOutcome::Unchanged | ReportOutcome::Deferred { .. } => {}
        }
    }

    fn on_socket(&mut self, generation: Generation, event: SocketEvent) {
        if !self.sockets.contains_key(&generation) {
            debug!(%generation, "event from released socket: {event:?}");
            return;
        }
        let result = match event {
            SocketEvent::Opened => self.client.on_open(generation),
            SocketEvent::Message(text) => self.client.on_message(generation, &text),
            SocketEvent::Error(reason) => {
                self.sockets.remove(&generation);
                self.client.on_error(generation, &reason)
            }
            SocketEvent::Closed { code, reason } => {
                self.sockets.remove(&generation);
                self.client.on_close(generation, code, &reason)
            }
        };
        self.execute(result);
    }

    fn execute(&mut self, result: Commands) {
        let mut queue: VecDeque<Command> = match result {
            Ok(commands) => commands.into(),
            Err(err) => {
                warn!("live client rejected input: {err}");
                return;
            }
        };

        while let Some(command) = queue.pop_front() {
            match command {
                Command::Connect { generation } => {
                    let socket = transport::spawn_socket(
                        self.endpoint.clone(),
                        generation,
                        self.socket_tx.clone(),
                    );
                    self.sockets.insert(generation, socket);
                }
                Command::ArmConnectTimeout { generation, after } => {
                    self.arm(generation, Timer::ConnectTimeout, after)
                }
                Command::Send { generation, text } => match self.sockets.get(&generation) {
                    Some(socket) if socket.send(text) => {}
                    _ => debug!(%generation, "socket gone before send"),
                },
                Command::Close { generation } => {
                    // Only sockets still held get a synthesized close.
                    if let Some(socket) = self.sockets.remove(&generation) {
                        socket.close();
                        match self
                            .client
                            .on_close(generation, NORMAL_CLOSURE, "closed by client")
                        {
                            Ok(more) => queue.extend(more),
                            Err(err) => warn!("live client rejected close: {err}"),
                        }
                    }
                }
                Command::ScheduleReconnect { generation, after } => {
                    self.arm(generation, Timer::ReconnectDue, after)
                }
            }
        }
    }

    fn arm(&self, generation: Generation, timer: Timer, after: Duration) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send((generation, timer));
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use runtime::EventBus;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    fn collection(mmsi: u64, heading: f64) -> String {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [-70.0, 40.0] },
                "properties": { "heading": heading, "mmsi": mmsi }
            }]
        })
        .to_string()
    }

    /// Feed stub: records every subscribe it receives and answers with a
    /// snapshot whose MMSI is the connection's ordinal. With `drop_first`,
    /// the first connection is closed right after its snapshot.
    async fn feed(drop_first: bool) -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut ordinal = 0u64;
            while let Ok((stream, _)) = listener.accept().await {
                ordinal += 1;
                let seen = seen_tx.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let _ = seen.send(serde_json::from_str::<Value>(&text).unwrap());
                            let _ = ws.send(Message::Text(r#"{"status":"subscribed"}"#.into())).await;
                            let _ = ws.send(Message::Text(collection(ordinal, 90.0))).await;
                            if drop_first && ordinal == 1 {
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}/ais"), seen_rx)
    }

    fn config(endpoint: String) -> ClientConfig {
        ClientConfig {
            endpoint,
            min_report_interval_ms: 0,
            reconnect_base_ms: 20,
            reconnect_max_ms: 100,
            max_retries: 3,
            ..ClientConfig::default()
        }
    }

    async fn next_snapshot(rx: &mut watch::Receiver<Arc<Snapshot>>) -> Arc<Snapshot> {
        timeout(WAIT, rx.changed()).await.unwrap().unwrap();
        rx.borrow_and_update().clone()
    }

    #[tokio::test]
    async fn resubscribes_when_viewport_changes() {
        let (endpoint, mut seen) = feed(false).await;
        let bus = Arc::new(EventBus::new());
        let (handle, task) = spawn(config(endpoint), bus.clone()).unwrap();
        let mut rx = handle.subscribe();

        let first = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(
            first,
            json!({ "type": "subscribe", "boundingBox": [[-72.0, 44.0], [-68.0, 38.0]] })
        );
        let snap = next_snapshot(&mut rx).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.targets[0].heading, Some(90.0));
        assert_eq!(snap.targets[0].id.as_str(), "1");

        handle.report([[-71.0, 42.0], [-69.0, 39.0]]);
        handle.report([[-71.0, 42.0], [-69.0, 39.0]]);
        let second = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(
            second,
            json!({ "type": "subscribe", "boundingBox": [[-71.0, 42.0], [-69.0, 39.0]] })
        );
        let snap = next_snapshot(&mut rx).await;
        assert_eq!(snap.targets[0].id.as_str(), "2");

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(bus.count("subscribed"), 2);
        assert!(seen.try_recv().is_err(), "duplicate report must not resubscribe");
    }

    #[tokio::test]
    async fn reconnects_with_same_region_after_server_close() {
        let (endpoint, mut seen) = feed(true).await;
        let bus = Arc::new(EventBus::new());
        let mut cfg = config(endpoint);
        cfg.initial_viewport = [[-71.0, 42.0], [-69.0, 39.0]];
        let (handle, task) = spawn(cfg, bus.clone()).unwrap();

        let first = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(second["boundingBox"], json!([[-71.0, 42.0], [-69.0, 39.0]]));
        assert!(bus.count("reconnect_scheduled") >= 1);

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/ais", listener.local_addr().unwrap());
        drop(listener);

        let bus = Arc::new(EventBus::new());
        let (handle, task) = spawn(config(endpoint), bus.clone()).unwrap();

        timeout(WAIT, async {
            while bus.count("persistent_failure") == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(bus.count("reconnect_scheduled"), 3);
        assert!(handle.current().is_initial());

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_reconnects() {
        // Accepts TCP but never answers the websocket upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/ais", listener.local_addr().unwrap());
        let accepting = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let bus = Arc::new(EventBus::new());
        let mut cfg = config(endpoint);
        cfg.connect_timeout_ms = 50;
        let (handle, task) = spawn(cfg, bus.clone()).unwrap();

        timeout(WAIT, async {
            while bus.count("reconnect_scheduled") == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let kinds = bus.kinds();
        let error_at = kinds.iter().position(|k| *k == "error").unwrap();
        let scheduled_at = kinds.iter().position(|k| *k == "reconnect_scheduled").unwrap();
        assert!(error_at < scheduled_at, "{kinds:?}");
        assert!(!kinds.contains(&"connection_opened"), "{kinds:?}");
        let timed_out = bus.events().into_iter().any(|e| {
            matches!(&e.observation, Observation::Error { reason, .. } if reason.contains("timed out"))
        });
        assert!(timed_out, "{:?}", bus.events());

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
        accepting.abort();
    }

    #[tokio::test]
    async fn invalid_report_is_observed_not_sent() {
        let (endpoint, mut seen) = feed(false).await;
        let bus = Arc::new(EventBus::new());
        let (handle, task) = spawn(config(endpoint), bus.clone()).unwrap();
        timeout(WAIT, seen.recv()).await.unwrap().unwrap();

        handle.report([[170.0, 10.0], [-170.0, 20.0]]);
        timeout(WAIT, async {
            while bus.count("viewport_rejected") == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.stop();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(seen.try_recv().is_err());
        assert_eq!(bus.count("subscribed"), 1);
        assert_eq!(bus.count("viewport_rejected"), 1);
    }

    #[test]
    fn rejects_invalid_initial_viewport() {
        let cfg = ClientConfig {
            initial_viewport: [[0.0, 0.0], [0.0, 1.0]],
            ..ClientConfig::default()
        };
        assert!(spawn(cfg, Arc::new(EventBus::new())).is_err());
    }
}
