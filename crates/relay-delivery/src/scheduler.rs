//! Fixed-period retry of queued deliveries.
//!
//! A background task drains the failure queue on a fixed interval. Each
//! pass walks every queued record, re-signs its stored payload with the
//! configuration current at pass time, and redelivers. The retry budget
//! adapts to connectivity: while the network is down, passes keep running
//! but records are allowed a far larger attempt count, so an outage does
//! not burn through the online budget.

use std::sync::Arc;

use relay_core::{AuditEntry, AuditStream, ConnectivityState, Disposition, Storage};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    client::{DeliveryClient, DeliveryOutcome},
    config::SharedConfig,
    error::Result,
    signer,
};

/// Attempt budget applied while the network is unreachable.
///
/// Effectively unbounded: records queued during an outage must survive
/// until connectivity returns, however long that takes.
pub const OFFLINE_RETRY_LIMIT: u32 = 10_000;

/// Running retry loop with its cancellation handle.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancels the loop and waits for it to finish.
    ///
    /// A pass already under way stops before its next record; the record in
    /// flight still has its result applied.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!("retry scheduler task panicked: {}", e);
        }
    }
}

/// Counters from one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Records examined this pass.
    pub examined: usize,
    /// Records delivered and removed.
    pub delivered: usize,
    /// Records that failed again and stay queued.
    pub failed: usize,
    /// Records dropped for exhausting the attempt budget.
    pub dropped: usize,
}

/// Periodic retry of the failure queue.
pub struct RetryScheduler {
    config: SharedConfig,
    client: DeliveryClient,
    storage: Storage,
    connectivity: watch::Receiver<ConnectivityState>,
    // Guards against overlapping passes when one runs long.
    pass_lock: Mutex<()>,
}

impl RetryScheduler {
    /// Creates a scheduler over the given stores, client, and connectivity
    /// feed.
    pub fn new(
        config: SharedConfig,
        client: DeliveryClient,
        storage: Storage,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> Self {
        Self { config, client, storage, connectivity, pass_lock: Mutex::new(()) }
    }

    /// Starts the retry loop.
    ///
    /// The first pass runs immediately, draining anything queued before a
    /// restart, then passes repeat on the configured interval. The loop
    /// also exits when `shutdown` is cancelled, so callers can tie it to a
    /// process-wide token as well as stopping it directly.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> SchedulerHandle {
        let shutdown = shutdown.child_token();
        let loop_token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let shutdown = loop_token;
            let period = self.config.read().await.retry_interval();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::debug!("retry scheduler stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.run_pass(&shutdown).await {
                    tracing::error!("retry pass failed: {}", e);
                }
            }
        });

        SchedulerHandle { shutdown, handle }
    }

    /// Runs one retry pass over the whole queue.
    ///
    /// Cancellation is observed between records: the pass stops before
    /// starting the next record, never mid-exchange.
    pub async fn run_pass(&self, shutdown: &CancellationToken) -> Result<RetryStats> {
        let _guard = self.pass_lock.lock().await;

        let (signing_key, endpoint_url, retry_limit, timeout) = {
            let config = self.config.read().await;
            (
                config.signing_key.clone(),
                config.endpoint_url.clone(),
                config.retry_limit,
                config.delivery_timeout(),
            )
        };

        let effective_limit = if self.connectivity.borrow().is_online() {
            retry_limit
        } else {
            OFFLINE_RETRY_LIMIT
        };

        let records = self.storage.failures.list_all()?;
        let mut stats = RetryStats::default();

        for mut record in records {
            if shutdown.is_cancelled() {
                tracing::debug!(remaining = stats.examined, "retry pass interrupted");
                break;
            }
            stats.examined += 1;

            if record.attempts >= effective_limit {
                self.storage.failures.remove(&record.fingerprint)?;
                self.storage.audit.record(
                    AuditStream::Retried,
                    &AuditEntry::now(
                        &record.sender,
                        record.payload_text(),
                        Some(format!("dropped after {} attempts", record.attempts)),
                        Disposition::Dropped,
                    ),
                )?;
                tracing::warn!(
                    sender = %record.sender,
                    attempts = record.attempts,
                    limit = effective_limit,
                    "retry budget exhausted, dropping record"
                );
                stats.dropped += 1;
                continue;
            }

            // Re-sign at pass time so key and endpoint rotations apply to
            // work queued under the old configuration.
            let signature = signer::sign(&record.payload, &signing_key)?;
            let result = self
                .client
                .deliver(&record.payload, &signature, &endpoint_url, Some(timeout))
                .await;

            match result {
                Ok(DeliveryOutcome::Accepted { status }) => {
                    self.storage.failures.remove(&record.fingerprint)?;
                    self.storage.dedup.add(&record.fingerprint)?;
                    self.storage.audit.record(
                        AuditStream::Retried,
                        &AuditEntry::now(
                            &record.sender,
                            record.payload_text(),
                            None,
                            Disposition::Accepted,
                        ),
                    )?;
                    tracing::info!(sender = %record.sender, status, "retry delivered");
                    stats.delivered += 1;
                },
                Ok(DeliveryOutcome::Rejected { status, status_text }) => {
                    self.note_failure(&mut record, format!("HTTP {status} {status_text}"))?;
                    stats.failed += 1;
                },
                Err(e) if e.is_retryable() => {
                    self.note_failure(&mut record, e.to_string())?;
                    stats.failed += 1;
                },
                Err(e) => return Err(e),
            }
        }

        if stats.examined > 0 {
            tracing::info!(
                examined = stats.examined,
                delivered = stats.delivered,
                failed = stats.failed,
                dropped = stats.dropped,
                "retry pass complete"
            );
        }
        Ok(stats)
    }

    fn note_failure(
        &self,
        record: &mut relay_core::QueuedDelivery,
        error_text: String,
    ) -> Result<()> {
        record.attempts += 1;
        self.storage.failures.update(record)?;
        self.storage.audit.record(
            AuditStream::Retried,
            &AuditEntry::now(
                &record.sender,
                record.payload_text(),
                Some(error_text.clone()),
                Disposition::Failed,
            ),
        )?;
        tracing::debug!(
            sender = %record.sender,
            attempts = record.attempts,
            error = %error_text,
            "retry failed"
        );
        Ok(())
    }
}
