mod pumpportal_ws;
mod runtime;

use launch_tracker_core::feed::{FeedSignal, SubscriptionRequest};
use launch_tracker_core::native::JsonFileStore;
use launch_tracker_core::{CompletionSink, CoreError, Settings, Tracker, TrackerStats};
use log::{error, info};
use pumpportal_ws::{run_pumpportal_ws, FeedClientConfig};
use runtime::{run_tracker, LoopTiming};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // Print an unconditional startup line so users see the binary started
    // even when RUST_LOG filters everything out.
    println!(
        "launch_tracker starting (pid {}), RUST_LOG={:?}",
        std::process::id(),
        std::env::var("RUST_LOG").ok()
    );

    let config_path = std::env::var("LAUNCH_TRACKER_CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());
    let settings = Settings::from_file(&config_path)?;
    settings.validate()?;
    info!(
        "Loaded {}: {} checkpoints, sol_usd_rate={}, runner >= ${:.0}, target > ${:.0}, max age {}s, inactivity {}s",
        config_path,
        settings.checkpoints.len(),
        settings.sol_usd_rate,
        settings.runner_threshold_usd,
        settings.completion_target_usd,
        settings.max_age_secs,
        settings.inactivity_timeout_secs
    );

    let stats = Arc::new(TrackerStats::new());
    let tracker = Tracker::with_stats(&settings, stats.clone())?;
    let store = JsonFileStore::open(&settings.store_path).await?;
    info!("Writing completed tokens to {:?}", store.path());
    let sink: Arc<dyn CompletionSink> = Arc::new(store);

    let (feed_tx, feed_rx) = mpsc::channel::<FeedSignal>(settings.channel_capacity);
    let (control_tx, control_rx) = mpsc::unbounded_channel::<SubscriptionRequest>();

    let ws_handle = tokio::spawn(run_pumpportal_ws(
        FeedClientConfig::from_settings(&settings),
        feed_tx,
        control_rx,
        stats.clone(),
    ));

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let tracker = run_tracker(
        tracker,
        feed_rx,
        control_tx,
        sink,
        LoopTiming::from_settings(&settings),
        shutdown,
    )
    .await;

    stats.log_stats(tracker.active_count());
    ws_handle.abort();
    if let Err(e) = ws_handle.await {
        if !e.is_cancelled() {
            error!("Feed task exited unexpectedly: {:?}", e);
        }
    }
    info!("launch_tracker stopped");
    Ok(())
}
