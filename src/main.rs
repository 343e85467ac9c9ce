use anyhow::{Context, Result};
use std::env;
use tokio::{
    signal,
    time::{self, Duration},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tokenbucket::config;

// Drives a synthetic load against one bucket until Ctrl-C and reports how
// many hits were granted.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::load()?;
    let pace = env::var("TOKENBUCKET_HIT_EVERY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(100));

    let daemon = cfg.build_daemon();
    daemon.start().context("starting refill daemon")?;
    info!(
        bucket = %cfg.designation,
        ?pace,
        metrics = config::metrics_enabled(),
        "driving hits, press Ctrl-C to stop"
    );

    let mut granted: u64 = 0;
    let mut denied: u64 = 0;
    let mut ticker = time::interval(pace);
    let mut report = time::interval(Duration::from_secs(5));
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                info!(granted, denied, tokens = daemon.bucket().tokens(), "progress");
            }
            _ = ticker.tick() => {
                if daemon.hit().await {
                    granted += 1;
                } else {
                    denied += 1;
                }
            }
        }
    }

    daemon.stop().await;
    info!(granted, denied, "shutting down");
    Ok(())
}
