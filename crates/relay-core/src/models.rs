//! Domain models for the relay pipeline.
//!
//! A [`Message`] is the transient inbound unit; everything persisted is a
//! derived form: the [`Fingerprint`] used for dedup, the [`QueuedDelivery`]
//! record held for retry, and the [`AuditEntry`] rows written for every
//! terminal outcome.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// An inbound short message as handed over by the host feed.
///
/// Never persisted directly; only derived forms survive the capture pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Originating sender identifier (phone number or similar).
    pub sender: String,
    /// Message text.
    pub body: String,
    /// Receipt time in epoch milliseconds.
    pub received_at: i64,
}

impl Message {
    /// Creates a message from its parts.
    pub fn new(sender: impl Into<String>, body: impl Into<String>, received_at: i64) -> Self {
        Self { sender: sender.into(), body: body.into(), received_at }
    }

    /// Computes the dedup fingerprint for this message.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.sender, self.received_at, &self.body)
    }
}

/// Compact identifier of a message used to detect duplicates.
///
/// Derived from the `(sender, received_at, body)` triple: identical triples
/// always produce identical fingerprints. Truncated to 128 bits; collisions
/// are accepted in exchange for compact storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives the fingerprint of a `(sender, timestamp, body)` triple.
    pub fn of(sender: &str, received_at: i64, body: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sender.as_bytes());
        hasher.update(b"|");
        hasher.update(received_at.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(body.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Raw bytes suitable for use as a storage key.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The JSON body that is signed and transmitted.
///
/// Field names are part of the wire contract and must not change. The
/// serialized bytes of this struct are the canonical payload: the same
/// bytes are fed to the signer and the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayload {
    /// Originating sender identifier.
    pub sender: String,
    /// Configured identifier of the receiving device; may be empty.
    pub receiver: String,
    /// Message text.
    pub message: String,
    /// Receipt time in epoch milliseconds.
    pub time: i64,
}

impl OutboundPayload {
    /// Builds the payload for a message destined to `receiver`.
    pub fn from_message(message: &Message, receiver: &str) -> Self {
        Self {
            sender: message.sender.clone(),
            receiver: receiver.to_string(),
            message: message.body.clone(),
            time: message.received_at,
        }
    }

    /// Serializes to the canonical JSON bytes that are signed and sent.
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A delivery that failed immediately and is held for retry.
///
/// Created when a capture-time delivery fails; mutated by the retry
/// scheduler (`attempts += 1` per failed pass); destroyed on success or
/// when attempts exhaust the effective retry limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedDelivery {
    /// Unique record id.
    pub id: Uuid,
    /// Fingerprint of the originating message; also the queue key.
    pub fingerprint: Fingerprint,
    /// Originating sender, kept for audit entries.
    pub sender: String,
    /// Canonical payload bytes, re-signed as-is on each retry.
    pub payload: Vec<u8>,
    /// Number of failed retry passes so far.
    pub attempts: u32,
}

impl QueuedDelivery {
    /// Creates a fresh queue record with zero attempts.
    pub fn new(fingerprint: Fingerprint, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { id: Uuid::new_v4(), fingerprint, sender: sender.into(), payload, attempts: 0 }
    }

    /// Message text recovered from the stored payload, for audit entries.
    pub fn payload_text(&self) -> String {
        serde_json::from_slice::<OutboundPayload>(&self.payload)
            .map(|p| p.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&self.payload).into_owned())
    }
}

/// Terminal disposition recorded with an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Delivery confirmed by the endpoint.
    Accepted,
    /// Delivery failed; record queued or re-queued.
    Failed,
    /// Retry limit exhausted; record discarded.
    Dropped,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Failed => write!(f, "failed"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// The three append-only audit streams, split by outcome category.
///
/// Purely observational; the core never reads them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStream {
    /// First-attempt deliveries confirmed by the endpoint.
    Accepted,
    /// First-attempt deliveries that failed and were queued.
    Failed,
    /// Outcomes produced by the retry scheduler.
    Retried,
}

impl AuditStream {
    pub(crate) fn tree_name(self) -> &'static str {
        match self {
            Self::Accepted => "audit_accepted",
            Self::Failed => "audit_failed",
            Self::Retried => "audit_retried",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Originating sender.
    pub sender: String,
    /// Human-readable text, typically the message body.
    pub text: String,
    /// Error detail for failed outcomes.
    pub error_text: Option<String>,
    /// Terminal disposition of the attempt.
    pub disposition: Disposition,
    /// Entry time in epoch milliseconds.
    pub timestamp: i64,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(
        sender: impl Into<String>,
        text: impl Into<String>,
        error_text: Option<String>,
        disposition: Disposition,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            error_text,
            disposition,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Reachability of the delivery endpoint's network, as published by the
/// connectivity monitor. Single writer, many readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// Network believed reachable (optimistic initial state).
    #[default]
    Online,
    /// Probe failed or timed out.
    Offline,
}

impl ConnectivityState {
    /// True when the network is believed reachable.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}
