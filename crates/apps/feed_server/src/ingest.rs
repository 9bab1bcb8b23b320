//! Upstream AIS ingest: subscribes to an aisstream-style websocket and keeps
//! the fleet's latest position per MMSI.

use std::env;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use runtime::Backoff;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::fleet::{unix_now, Fleet, TargetRecord};

pub const POSITION_REPORT: &str = "PositionReport";

/// New York to Boston, `[lat, lon]` corners.
const DEFAULT_BOX: [[f64; 2]; 2] = [[40.0, -74.5], [42.0, -68.0]];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upstream socket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed upstream message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub url: String,
    pub api_key: String,
    /// Upstream boxes are `[lat, lon]` corner pairs.
    pub bounding_boxes: Vec<[[f64; 2]; 2]>,
    pub backoff: Backoff,
}

impl IngestConfig {
    /// `None` unless both `AISSTREAM_URL` and `AISSTREAM_API_KEY` are set.
    pub fn from_env() -> Option<Self> {
        let url = env::var("AISSTREAM_URL").ok().filter(|v| !v.is_empty())?;
        let Some(api_key) = env::var("AISSTREAM_API_KEY").ok().filter(|v| !v.is_empty()) else {
            warn!("AISSTREAM_URL is set but AISSTREAM_API_KEY is not; ingest disabled");
            return None;
        };
        let bounding_boxes = match env::var("AISSTREAM_BBOX") {
            Ok(raw) => match parse_box(&raw) {
                Some(b) => vec![b],
                None => {
                    warn!("ignoring malformed AISSTREAM_BBOX {raw:?}");
                    vec![DEFAULT_BOX]
                }
            },
            Err(_) => vec![DEFAULT_BOX],
        };
        Some(Self {
            url,
            api_key,
            bounding_boxes,
            backoff: Backoff::default(),
        })
    }

    pub fn subscription(&self) -> UpstreamSubscription {
        UpstreamSubscription {
            api_key: self.api_key.clone(),
            bounding_boxes: self.bounding_boxes.clone(),
            filter_message_types: vec![POSITION_REPORT.to_string()],
        }
    }
}

/// `lat1,lon1,lat2,lon2`
fn parse_box(raw: &str) -> Option<[[f64; 2]; 2]> {
    let v = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match v.as_slice() {
        [a, b, c, d] => Some([[*a, *b], [*c, *d]]),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamSubscription {
    #[serde(rename = "Apikey")]
    pub api_key: String,
    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<[[f64; 2]; 2]>,
    #[serde(rename = "FilterMessageTypes")]
    pub filter_message_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AisMessage {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "Message", default)]
    message: Value,
    #[serde(rename = "MetaData")]
    meta: MetaData,
}

#[derive(Debug, Deserialize)]
struct MetaData {
    #[serde(rename = "MMSI")]
    mmsi: u64,
    #[serde(rename = "ShipName", default)]
    ship_name: String,
    latitude: f64,
    longitude: f64,
}

/// Turns one upstream frame into a fleet record stamped `now_s`.
/// Frames of other message types yield `Ok(None)`.
pub fn decode_position(text: &str, now_s: u64) -> Result<Option<TargetRecord>, IngestError> {
    let msg: AisMessage = serde_json::from_str(text)?;
    if msg.message_type != POSITION_REPORT {
        return Ok(None);
    }
    let heading = msg.message[POSITION_REPORT]["TrueHeading"].as_f64();
    // aisstream pads names with trailing spaces.
    let name = msg.meta.ship_name.trim();
    Ok(Some(TargetRecord {
        mmsi: msg.meta.mmsi,
        ship_name: (!name.is_empty()).then(|| name.to_string()),
        lon: msg.meta.longitude,
        lat: msg.meta.latitude,
        heading,
        time_utc: Some(now_s),
    }))
}

/// Keeps an upstream subscription alive until the backoff policy gives up.
pub async fn run_ingest(config: IngestConfig, fleet: Arc<Fleet>) {
    let mut attempts = 0;
    loop {
        let mut ingested = 0;
        let result = ingest_once(&config, &fleet, &mut ingested).await;
        if ingested > 0 {
            attempts = 0;
        }
        match result {
            Ok(()) => info!("upstream closed after {ingested} position reports"),
            Err(e) => warn!("upstream ingest failed after {ingested} position reports: {e}"),
        }

        attempts += 1;
        let Some(delay) = config.backoff.delay(attempts) else {
            error!("giving up on upstream {} after {} attempts", config.url, attempts - 1);
            return;
        };
        debug!("reconnecting to upstream in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

/// One upstream connection: subscribe, then upsert every position report.
pub async fn ingest_once(
    config: &IngestConfig,
    fleet: &Fleet,
    ingested: &mut u64,
) -> Result<(), IngestError> {
    info!("connecting to upstream {}", config.url);
    let (mut ws, _) = connect_async(config.url.as_str()).await?;
    let subscription = serde_json::to_string(&config.subscription())?;
    ws.send(Message::Text(subscription)).await?;

    while let Some(frame) = ws.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        };
        match decode_position(&text, unix_now()) {
            Ok(Some(record)) => {
                let mmsi = record.mmsi;
                if fleet.upsert(record) {
                    debug!("new vessel {mmsi}");
                }
                *ingested += 1;
            }
            Ok(None) => {}
            Err(e) => warn!("skipping upstream frame: {e}"),
        }
    }
    Ok(())
}
