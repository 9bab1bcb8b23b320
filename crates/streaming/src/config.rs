use std::env;
use std::time::Duration;

use runtime::Backoff;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ais";

/// Region shown before the map reports anything.
pub const DEFAULT_VIEWPORT: [[f64; 2]; 2] = [[-72.0, 44.0], [-68.0, 38.0]];

/// Configuration for the live subscription client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Websocket endpoint of the feed.
    pub endpoint: String,

    /// Region subscribed to at startup.
    pub initial_viewport: [[f64; 2]; 2],

    /// A connect attempt still pending after this long counts as failed.
    pub connect_timeout_ms: u64,

    /// Viewport changes closer together than this are coalesced.
    pub min_report_interval_ms: u64,

    /// First reconnect delay; doubles per consecutive failure.
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            initial_viewport: DEFAULT_VIEWPORT,
            connect_timeout_ms: 10_000,
            min_report_interval_ms: 250,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
            max_retries: 8,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `AIS_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: env::var("AIS_ENDPOINT").unwrap_or(d.endpoint),
            initial_viewport: env::var("AIS_VIEWPORT")
                .ok()
                .and_then(|v| parse_corners(&v))
                .unwrap_or(d.initial_viewport),
            connect_timeout_ms: env_var_u64("AIS_CONNECT_TIMEOUT_MS", d.connect_timeout_ms),
            min_report_interval_ms: env_var_u64(
                "AIS_MIN_REPORT_INTERVAL_MS",
                d.min_report_interval_ms,
            ),
            reconnect_base_ms: env_var_u64("AIS_RECONNECT_BASE_MS", d.reconnect_base_ms),
            reconnect_max_ms: env_var_u64("AIS_RECONNECT_MAX_MS", d.reconnect_max_ms),
            max_retries: env_var_u32("AIS_MAX_RETRIES", d.max_retries),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn min_report_interval(&self) -> Duration {
        Duration::from_millis(self.min_report_interval_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
            self.max_retries,
        )
    }
}

/// Parses `minLon,latA,maxLon,latB` into corner form.
pub fn parse_corners(raw: &str) -> Option<[[f64; 2]; 2]> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [a, b, c, d] => Some([[*a, *b], [*c, *d]]),
        _ => None,
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
