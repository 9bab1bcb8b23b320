use std::sync::Arc;

use clap::Parser;
use live_client::LiveHandle;
use runtime::metrics::{MESSAGES_APPLIED, SNAPSHOT_SIZE};
use runtime::{MetricsSnapshot, Observer, TracingObserver};
use streaming::{parse_corners, ClientConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless live AIS viewport client")]
struct Args {
    /// Feed websocket endpoint (default: AIS_ENDPOINT or ws://localhost:8080/ais)
    #[arg(long)]
    endpoint: Option<String>,

    /// Initial region: lonA,latA,lonB,latB
    #[arg(long)]
    bbox: Option<String>,

    /// Regions to move to after subscribing, one every --pan-every-ms
    #[arg(long = "pan")]
    pans: Vec<String>,

    #[arg(long, default_value_t = 5_000)]
    pan_every_ms: u64,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env();
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(bbox) = args.bbox.as_deref() {
        config.initial_viewport =
            parse_corners(bbox).ok_or_else(|| anyhow::anyhow!("invalid --bbox {bbox:?}"))?;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    let pans = args
        .pans
        .iter()
        .map(|raw| parse_corners(raw).ok_or_else(|| anyhow::anyhow!("invalid --pan {raw:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let observer: Arc<dyn Observer> = Arc::new(TracingObserver);
    let (handle, task) = live_client::spawn(config, observer)?;

    tokio::spawn(log_snapshots(handle.clone()));
    if !pans.is_empty() {
        tokio::spawn(pan(handle.clone(), pans, args.pan_every_ms));
    }

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt, stopping");
        }
        stopper.stop();
    });

    task.await?;
    log_summary(&handle.metrics());
    Ok(())
}

fn log_summary(metrics: &MetricsSnapshot) {
    let applied = metrics
        .counters
        .iter()
        .find(|(name, _)| name == MESSAGES_APPLIED)
        .map_or(0, |(_, n)| *n);
    let mean_size = metrics
        .histograms
        .iter()
        .find(|(name, _)| name == SNAPSHOT_SIZE)
        .and_then(|(_, h)| h.mean());
    info!(applied, ?mean_size, counters = ?metrics.counters, "live client finished");
}

async fn log_snapshots(handle: LiveHandle) {
    let mut rx = handle.subscribe();
    while rx.changed().await.is_ok() {
        let snap = rx.borrow_and_update().clone();
        let with_heading = snap.targets.iter().filter(|t| t.heading.is_some()).count();
        let sample: Vec<&str> = snap.targets.iter().take(3).map(|t| t.id.as_str()).collect();
        info!(
            revision = snap.revision,
            generation = %snap.generation,
            targets = snap.len(),
            with_heading,
            ?sample,
            "snapshot"
        );
    }
}

async fn pan(handle: LiveHandle, regions: Vec<[[f64; 2]; 2]>, every_ms: u64) {
    let every = std::time::Duration::from_millis(every_ms);
    for region in regions {
        tokio::time::sleep(every).await;
        info!(?region, "panning");
        handle.report(region);
    }
}
