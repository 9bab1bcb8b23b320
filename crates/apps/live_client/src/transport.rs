//! One websocket per generation.
//!
//! Each socket runs in its own task and reports back over a shared channel,
//! tagging every event with its generation so the driver can drop traffic
//! from sockets it has already let go of.

use std::borrow::Cow;

use foundation::Generation;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Error(String),
    Closed { code: u16, reason: String },
}

pub type SocketEvents = mpsc::UnboundedSender<(Generation, SocketEvent)>;

enum Outgoing {
    Text(String),
    Close,
}

pub struct SocketHandle {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl SocketHandle {
    /// Queues a text frame; false if the socket task has already ended.
    pub fn send(&self, text: String) -> bool {
        self.tx.send(Outgoing::Text(text)).is_ok()
    }

    /// Sends a normal close (or abandons a pending connect) and lets the task finish.
    pub fn close(self) {
        if self.tx.send(Outgoing::Close).is_err() {
            debug!("socket task already finished");
        }
    }
}

pub fn spawn_socket(url: String, generation: Generation, events: SocketEvents) -> SocketHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_socket(url, generation, rx, events));
    SocketHandle { tx }
}

async fn run_socket(
    url: String,
    generation: Generation,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: SocketEvents,
) {
    let report = |event: SocketEvent| {
        // The driver going away means nobody cares about this socket any more.
        let _ = events.send((generation, event));
    };

    // Nothing but a close is ever queued before the socket opens.
    let ws = tokio::select! {
        res = connect_async(url.as_str()) => match res {
            Ok((ws, _response)) => ws,
            Err(e) => {
                report(SocketEvent::Error(format!("connect to {url} failed: {e}")));
                return;
            }
        },
        _ = outgoing.recv() => {
            debug!(%generation, "connect abandoned");
            return;
        }
    };

    report(SocketEvent::Opened);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        report(SocketEvent::Error(format!("send failed: {e}")));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Cow::Borrowed(""),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(%generation, "close handshake failed: {e}");
                    }
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => report(SocketEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    report(SocketEvent::Message(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                    report(SocketEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(SocketEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    report(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
        }
    }
}
