//! Message relay service.
//!
//! Main entry point. Wires the stdin feed, capture pipeline, connectivity
//! monitor, and retry scheduler together and coordinates graceful startup
//! and shutdown.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use relay_core::Storage;
use relay_delivery::{
    CapturePipeline, ConnectivityMonitor, DeliveryClient, OfflineAlert, RelayConfig,
    RetryScheduler,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod feed;

const BACKLOG_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::load().context("loading configuration")?;
    init_tracing(&config.rust_log);

    info!("starting message relay");
    info!(
        endpoint = %config.endpoint_url,
        allowed_senders = config.allowed_senders().len(),
        retry_limit = config.retry_limit,
        "configuration loaded"
    );
    if config.allowed_senders().is_empty() {
        warn!("allow-list is empty; no messages will be forwarded");
    }

    let db = sled::open(&config.data_dir)
        .with_context(|| format!("opening database at {}", config.data_dir))?;
    let storage = Storage::open(&db, config.dedup_capacity).context("opening stores")?;
    info!(
        queued = storage.failures.len(),
        deduped = storage.dedup.len(),
        "storage opened"
    );

    let client = DeliveryClient::new(config.to_client_config()).context("building HTTP client")?;
    let monitor_config = config.to_monitor_config();
    let spool_path = PathBuf::from(&config.spool_path);
    let shared = config.into_shared();

    let shutdown = CancellationToken::new();

    let (connectivity, monitor_handle) = ConnectivityMonitor::new(monitor_config)
        .with_offline_alert(Arc::new(LogOfflineAlert))
        .spawn(shutdown.clone());

    let scheduler = Arc::new(RetryScheduler::new(
        shared.clone(),
        client.clone(),
        storage.clone(),
        connectivity,
    ));
    let scheduler_handle = scheduler.start(shutdown.clone());

    let pipeline = Arc::new(CapturePipeline::new(shared, client, storage));

    // Catch up on anything received while the relay was down, then keep
    // rescanning in the background.
    let backlog = feed::SpoolBacklog::new(spool_path.clone());
    let scan_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(BACKLOG_SCAN_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = pipeline.scan_backlog(&backlog).await {
                    error!("backlog scan failed: {}", e);
                }
            }
        }
    });

    info!("relay is ready, reading messages from stdin");

    let feed_result = tokio::select! {
        result = feed::run_stdin_feed(&spool_path, shutdown.clone(), |message| {
            let pipeline = pipeline.clone();
            async move {
                if let Err(e) = pipeline.submit(&message).await {
                    error!(sender = %message.sender, "capture failed: {}", e);
                }
            }
        }) => result,
        () = shutdown_signal() => Ok(()),
    };

    info!("shutting down");
    shutdown.cancel();

    let drain = async {
        let _ = monitor_handle.await;
        scheduler_handle.stop().await;
        let _ = scan_handle.await;
    };
    tokio::select! {
        () = drain => info!("background tasks stopped"),
        () = tokio::time::sleep(SHUTDOWN_GRACE) => warn!("shutdown grace period expired"),
    }

    db.flush().context("flushing database")?;
    info!("relay shutdown complete");
    feed_result
}

/// Logs connectivity loss; transitions are already edge-triggered.
struct LogOfflineAlert;

#[async_trait]
impl OfflineAlert for LogOfflineAlert {
    async fn on_offline(&self) {
        warn!("network unreachable, queued deliveries will wait for connectivity");
    }
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(fallback: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
