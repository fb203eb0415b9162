//! Connectivity monitoring via periodic TCP probes.
//!
//! A background task probes a well-known address on a fixed interval and
//! publishes reachability over a watch channel. Publishing is
//! edge-triggered: consumers only see actual transitions, and an optional
//! alert hook fires once per loss of connectivity, not once per failed
//! probe.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use relay_core::ConnectivityState;
use tokio::{
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Hook invoked once on each transition from online to offline.
#[async_trait]
pub trait OfflineAlert: Send + Sync {
    /// Called after the offline state has been published.
    async fn on_offline(&self);
}

/// Configuration for the connectivity monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Address probed with a plain TCP connect.
    pub probe_addr: String,
    /// Time between probes.
    pub probe_interval: Duration,
    /// Deadline for a single probe; an elapsed deadline means offline.
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_addr: "8.8.8.8:53".to_string(),
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_millis(1500),
        }
    }
}

/// Periodically probes the network and publishes reachability transitions.
pub struct ConnectivityMonitor {
    config: MonitorConfig,
    alert: Option<Arc<dyn OfflineAlert>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given configuration.
    pub fn new(config: MonitorConfig) -> Self {
        Self { config, alert: None }
    }

    /// Registers a hook fired on each online-to-offline transition.
    #[must_use]
    pub fn with_offline_alert(mut self, alert: Arc<dyn OfflineAlert>) -> Self {
        self.alert = Some(alert);
        self
    }

    /// Starts the probe loop.
    ///
    /// Returns a receiver that always reflects the latest published state
    /// and the task handle. The initial state is optimistically
    /// [`ConnectivityState::Online`]; the first probe corrects it within
    /// one interval. The loop exits when `shutdown` is cancelled.
    pub fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> (watch::Receiver<ConnectivityState>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(ConnectivityState::Online);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::debug!("connectivity monitor stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let observed = probe(&self.config.probe_addr, self.config.probe_timeout).await;
                let previous = *tx.borrow();
                if observed == previous {
                    continue;
                }

                match observed {
                    ConnectivityState::Online => {
                        tracing::info!("connectivity restored");
                    },
                    ConnectivityState::Offline => {
                        tracing::warn!(probe_addr = %self.config.probe_addr, "connectivity lost");
                    },
                }

                // Receivers may all be gone during shutdown; keep probing
                // anyway so the alert hook still fires.
                let _ = tx.send(observed);

                if observed == ConnectivityState::Offline {
                    if let Some(alert) = &self.alert {
                        alert.on_offline().await;
                    }
                }
            }
        });

        (rx, handle)
    }
}

/// Single reachability probe: a TCP connect racing a deadline.
async fn probe(addr: &str, deadline: Duration) -> ConnectivityState {
    match timeout(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => ConnectivityState::Online,
        Ok(Err(e)) => {
            tracing::debug!("probe connect failed: {}", e);
            ConnectivityState::Offline
        },
        Err(_) => {
            tracing::debug!("probe timed out after {}ms", deadline.as_millis());
            ConnectivityState::Offline
        },
    }
}
