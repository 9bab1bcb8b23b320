//! AIS feed server: serves the fleet over the `/ais` subscription protocol,
//! optionally kept current from an upstream aisstream-style socket.

mod fleet;
mod ingest;
mod ws_feed;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::fleet::Fleet;
use crate::ingest::{run_ingest, IngestConfig};
use crate::ws_feed::{handle_feed_socket, FeedConfig};

#[derive(Clone)]
struct AppState {
    fleet: Arc<Fleet>,
    feed: FeedConfig,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = match env::var("FEED_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid FEED_ADDR: {e}");
            return;
        }
    };

    let fleet = match env::var("FEED_TARGETS") {
        Ok(path) => match load_fleet(&path).await {
            Ok(fleet) => fleet,
            Err(e) => {
                error!("failed to load {path}: {e}");
                return;
            }
        },
        Err(_) => Fleet::demo(),
    };
    info!("serving {} targets", fleet.len());
    let fleet = Arc::new(fleet);

    match IngestConfig::from_env() {
        Some(config) => {
            tokio::spawn(run_ingest(config, fleet.clone()));
        }
        None => info!("no upstream configured, serving a static fleet"),
    }

    let state = AppState {
        fleet,
        feed: FeedConfig {
            interval: Duration::from_millis(env_var_u64("FEED_INTERVAL_MS", 1_000)),
            max_age_s: env_var_u64("FEED_MAX_AGE_S", 120),
        },
    };

    let app = app(state);

    info!("feed server listening on ws://{addr}/ais");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ais", get(ais_ws))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn load_fleet(path: &str) -> Result<Fleet, Box<dyn std::error::Error + Send + Sync>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(Fleet::from_json(&raw)?)
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn ais_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_feed_socket(socket, state.fleet, state.feed))
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
