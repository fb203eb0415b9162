//! Capture pass: from inbound message to delivered or queued.
//!
//! Every message, whether observed live or re-observed by a backlog scan,
//! flows through the same pass: allow-list filter, dedup and queue checks,
//! sign, deliver, then record the outcome. Running backlog scans through
//! the identical path is what makes re-observation harmless.

use async_trait::async_trait;
use relay_core::{
    AuditEntry, AuditStream, Disposition, Message, OutboundPayload, QueuedDelivery, Storage,
};
use tokio::sync::Mutex;

use crate::{
    client::{DeliveryClient, DeliveryOutcome},
    config::SharedConfig,
    error::{DeliveryError, Result},
    signer,
};

/// Source of recently observed messages for backlog scans.
#[async_trait]
pub trait MessageBacklog: Send + Sync {
    /// The most recent messages, newest last, at most `window` of them.
    async fn recent(&self, window: usize) -> Result<Vec<Message>>;
}

/// Why a message was skipped without a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sender is not on the allow-list.
    SenderNotAllowed,
    /// Fingerprint already recorded as forwarded.
    AlreadyForwarded,
    /// A queued record for this fingerprint is awaiting retry.
    AlreadyQueued,
}

/// Result of capturing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Delivered and confirmed; fingerprint recorded.
    Forwarded,
    /// Delivery failed; record queued for retry.
    Queued,
    /// No delivery attempted.
    Skipped(SkipReason),
}

/// Counters from one backlog scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklogStats {
    /// Messages examined by the scan.
    pub examined: usize,
    /// Messages delivered and confirmed.
    pub forwarded: usize,
    /// Messages queued after a failed delivery.
    pub queued: usize,
    /// Messages skipped without an attempt.
    pub skipped: usize,
}

/// The capture pipeline shared by the live feed and backlog scans.
pub struct CapturePipeline {
    config: SharedConfig,
    client: DeliveryClient,
    storage: Storage,
    // One capture at a time; a live message arriving mid-scan waits its
    // turn rather than racing the scan for the same fingerprint.
    pass_lock: Mutex<()>,
}

impl CapturePipeline {
    /// Creates a pipeline over the given stores and client.
    pub fn new(config: SharedConfig, client: DeliveryClient, storage: Storage) -> Self {
        Self { config, client, storage, pass_lock: Mutex::new(()) }
    }

    /// Captures one live message.
    ///
    /// # Errors
    ///
    /// Returns an error only for non-retryable failures (signing, storage);
    /// failed deliveries are queued and reported as
    /// [`CaptureOutcome::Queued`].
    pub async fn submit(&self, message: &Message) -> Result<CaptureOutcome> {
        let _guard = self.pass_lock.lock().await;
        self.capture(message).await
    }

    /// Re-examines the most recent backlog messages through the capture
    /// pass.
    ///
    /// Messages already forwarded or already queued are skipped by the
    /// dedup and queue checks, so scanning is idempotent.
    pub async fn scan_backlog(&self, backlog: &dyn MessageBacklog) -> Result<BacklogStats> {
        let window = self.config.read().await.backlog_window;
        let messages = backlog.recent(window).await?;

        let _guard = self.pass_lock.lock().await;
        let mut stats = BacklogStats::default();
        for message in &messages {
            stats.examined += 1;
            match self.capture(message).await? {
                CaptureOutcome::Forwarded => stats.forwarded += 1,
                CaptureOutcome::Queued => stats.queued += 1,
                CaptureOutcome::Skipped(_) => stats.skipped += 1,
            }
        }

        if stats.examined > 0 {
            tracing::debug!(
                examined = stats.examined,
                forwarded = stats.forwarded,
                queued = stats.queued,
                skipped = stats.skipped,
                "backlog scan complete"
            );
        }
        Ok(stats)
    }

    /// One capture pass. Caller holds `pass_lock`.
    async fn capture(&self, message: &Message) -> Result<CaptureOutcome> {
        let (allowed, signing_key, endpoint_url, receiver, timeout) = {
            let config = self.config.read().await;
            (
                config.allowed_senders(),
                config.signing_key.clone(),
                config.endpoint_url.clone(),
                config.receiver.clone(),
                config.delivery_timeout(),
            )
        };

        // Exact match, fail closed: an empty allow-list forwards nothing.
        if !allowed.iter().any(|s| s == &message.sender) {
            tracing::debug!(sender = %message.sender, "sender not on allow-list");
            return Ok(CaptureOutcome::Skipped(SkipReason::SenderNotAllowed));
        }

        let fingerprint = message.fingerprint();
        if self.storage.dedup.contains(&fingerprint)? {
            tracing::debug!(%fingerprint, "already forwarded");
            return Ok(CaptureOutcome::Skipped(SkipReason::AlreadyForwarded));
        }
        if self.storage.failures.contains(&fingerprint)? {
            tracing::debug!(%fingerprint, "already queued for retry");
            return Ok(CaptureOutcome::Skipped(SkipReason::AlreadyQueued));
        }

        let payload = OutboundPayload::from_message(message, &receiver)
            .canonical_bytes()
            .map_err(|e| DeliveryError::signing(format!("payload serialization: {e}")))?;
        let signature = signer::sign(&payload, &signing_key)?;

        let result =
            self.client.deliver(&payload, &signature, &endpoint_url, Some(timeout)).await;

        match result {
            Ok(DeliveryOutcome::Accepted { status }) => {
                self.storage.dedup.add(&fingerprint)?;
                self.storage.audit.record(
                    AuditStream::Accepted,
                    &AuditEntry::now(&message.sender, &message.body, None, Disposition::Accepted),
                )?;
                tracing::info!(sender = %message.sender, status, "message forwarded");
                Ok(CaptureOutcome::Forwarded)
            },
            Ok(DeliveryOutcome::Rejected { status, status_text }) => {
                self.queue_failure(
                    message,
                    fingerprint,
                    payload,
                    format!("HTTP {status} {status_text}"),
                )
                .await
            },
            Err(e) if e.is_retryable() => {
                self.queue_failure(message, fingerprint, payload, e.to_string()).await
            },
            Err(e) => Err(e),
        }
    }

    async fn queue_failure(
        &self,
        message: &Message,
        fingerprint: relay_core::Fingerprint,
        payload: Vec<u8>,
        error_text: String,
    ) -> Result<CaptureOutcome> {
        let record = QueuedDelivery::new(fingerprint, &message.sender, payload);
        self.storage.failures.enqueue(&record)?;
        self.storage.audit.record(
            AuditStream::Failed,
            &AuditEntry::now(
                &message.sender,
                &message.body,
                Some(error_text.clone()),
                Disposition::Failed,
            ),
        )?;
        tracing::warn!(sender = %message.sender, error = %error_text, "delivery failed, queued");
        Ok(CaptureOutcome::Queued)
    }
}
