use anyhow::{Context, Result};
use presence_core::{AttendanceSession, SessionEvent, StatusLevel, SystemClock};
use presence_store::AttendanceStore;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

mod config;
mod feed;

use config::Config;
use feed::JsonLinesDetector;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    let session_config = config
        .session_config()
        .context("failed to load liveness policy")?;

    let store = AttendanceStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let enrolled = store.list().await?.len();
    tracing::info!(
        db = %config.db_path.display(),
        enrolled,
        threshold = session_config.match_threshold,
        tick_ms = config.tick_interval_ms,
        "attendance store ready"
    );

    let detector = JsonLinesDetector::spawn(BufReader::new(tokio::io::stdin()));
    let session = AttendanceSession::new(
        session_config,
        detector,
        store.clone(),
        store,
        SystemClock,
    );
    let (handle, mut events) = session.spawn();

    tracing::info!("presenced ready, reading detections from stdin");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    tracing::info!("presenced shutting down");
    handle.shutdown().await;

    Ok(())
}

fn log_event(event: &SessionEvent) {
    let message = event.message();
    match event.level() {
        StatusLevel::Info => tracing::debug!(status = %message),
        StatusLevel::Success => tracing::info!(status = %message),
        StatusLevel::Warning => tracing::warn!(status = %message),
        StatusLevel::Error => tracing::error!(status = %message),
    }
}
