//! HTTP client for signed payload delivery.
//!
//! Handles request construction, response classification, and error
//! categorization for the capture pass and the retry scheduler. Transport
//! failures become errors; any HTTP response, accepted or not, is a
//! successful exchange and becomes a [`DeliveryOutcome`].

use std::time::Duration;

use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default timeout applied when a delivery does not carry its own.
    pub default_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { default_timeout: Duration::from_secs(60), user_agent: "sms-relay/0.1".to_string() }
    }
}

/// Classified result of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Endpoint confirmed receipt (HTTP 200-204).
    Accepted {
        /// Confirming status code.
        status: u16,
    },
    /// Endpoint responded outside the accepted range.
    Rejected {
        /// Rejecting status code.
        status: u16,
        /// Status line text for audit entries.
        status_text: String,
    },
}

impl DeliveryOutcome {
    /// True when the endpoint confirmed receipt.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// HTTP client for delivering signed payloads.
///
/// A thin wrapper over a pooled [`reqwest::Client`]: one instance is shared
/// by the capture pass and the retry scheduler.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.default_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a signed payload to the endpoint.
    ///
    /// Sends `POST <endpoint_url>?sign=<signature>` with the payload bytes
    /// exactly as signed. Receipt is confirmed only by status codes 200
    /// through 204; every other status is a rejection. The URL and the
    /// signature travel together because the signature covers this exact
    /// body.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` when the request deadline elapses
    /// and `DeliveryError::Network` for every other transport failure. A
    /// completed exchange never errors; rejection is data, not an error,
    /// so the caller can audit the status before queueing.
    pub async fn deliver(
        &self,
        payload: &[u8],
        signature: &str,
        endpoint_url: &str,
        timeout: Option<Duration>,
    ) -> Result<DeliveryOutcome> {
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        let span = info_span!("delivery", url = %endpoint_url, timeout_ms = timeout.as_millis());

        async move {
            tracing::debug!(payload_len = payload.len(), "starting delivery");

            let response = self
                .client
                .post(endpoint_url)
                .query(&[("sign", signature)])
                .header("content-type", "application/json; charset=utf-8")
                .body(payload.to_vec())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| {
                    tracing::warn!("request failed: {}", e);
                    if e.is_timeout() {
                        DeliveryError::timeout(timeout.as_millis() as u64)
                    } else if e.is_connect() {
                        DeliveryError::network(format!("connection failed: {e}"))
                    } else {
                        DeliveryError::network(e.to_string())
                    }
                })?;

            let status = response.status();
            let outcome = if (200..=204).contains(&status.as_u16()) {
                tracing::info!(status = status.as_u16(), "delivery accepted");
                DeliveryOutcome::Accepted { status: status.as_u16() }
            } else {
                tracing::warn!(status = status.as_u16(), "delivery rejected");
                DeliveryOutcome::Rejected {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or("unknown").to_string(),
                }
            };

            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}
