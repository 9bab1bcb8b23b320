//! `/ais` websocket: one bounding-box subscription per connection.
//!
//! The first client message must be a `subscribe`. After that the server
//! pushes the full set of targets inside the box on every tick until the
//! client goes away; later client messages are only logged.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use streaming::ClientMessage;
use tracing::{debug, info, warn};

use crate::fleet::{unix_now, BoxFilter, Fleet};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub interval: Duration,
    pub max_age_s: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeError {
    Format,
    NotSubscribe,
    BoundingBox,
}

impl SubscribeError {
    pub fn message(self) -> &'static str {
        match self {
            SubscribeError::Format => "Invalid subscription message format",
            SubscribeError::NotSubscribe => "First message must be a subscribe message",
            SubscribeError::BoundingBox => {
                "Bounding box must contain exactly 2 coordinate pairs [lon, lat]"
            }
        }
    }
}

/// Validates the opening message and returns its two corners.
pub fn parse_subscribe(text: &str) -> Result<[[f64; 2]; 2], SubscribeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| SubscribeError::Format)?;
    let tag = value.as_object().ok_or(SubscribeError::Format)?.get("type");
    if tag.and_then(Value::as_str) != Some("subscribe") {
        return Err(SubscribeError::NotSubscribe);
    }
    match ClientMessage::deserialize(value) {
        Ok(ClientMessage::Subscribe { bounding_box }) => Ok(bounding_box),
        Err(_) => Err(SubscribeError::BoundingBox),
    }
}

pub async fn handle_feed_socket(mut socket: WebSocket, fleet: Arc<Fleet>, config: FeedConfig) {
    let corners = match socket.recv().await {
        Some(Ok(Message::Text(text))) => parse_subscribe(&text),
        Some(Ok(_)) => Err(SubscribeError::Format),
        Some(Err(e)) => {
            warn!("WS receive error before subscribe: {e}");
            return;
        }
        None => return,
    };
    let corners = match corners {
        Ok(c) => c,
        Err(err) => {
            warn!("rejecting subscription: {}", err.message());
            let body = json!({ "error": err.message() }).to_string();
            let _ = socket.send(Message::Text(body)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!("client subscribed with bounding box {corners:?}");
    let area = BoxFilter::from_corners(corners);
    let (mut ws_tx, mut ws_rx) = socket.split();
    if ws_tx
        .send(Message::Text(r#"{"status":"subscribed"}"#.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => debug!("ignoring client message after subscribe: {text}"),
                Ok(_) => {}
                Err(e) => {
                    debug!("WS receive error: {e}");
                    break;
                }
            }
        }
    });

    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = &mut reader => break,
            _ = ticker.tick() => {
                let msg = fleet.collection(area, unix_now(), config.max_age_s);
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to serialize collection: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    debug!("WS send failed: {e}");
                    break;
                }
            }
        }
    }
    reader.abort();
    info!("client for {corners:?} disconnected");
}
