//! Error types for capture and delivery operations.
//!
//! Defines all error conditions that can occur between receiving a message
//! and confirming its delivery, with enough context to decide whether a
//! failed attempt should be queued for retry.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for the capture and delivery pipeline.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Payload could not be signed.
    #[error("signing failed: {message}")]
    Signing {
        /// Description of the signing failure
        message: String,
    },

    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Milliseconds before the request timed out
        timeout_ms: u64,
    },

    /// Endpoint responded with a non-success status.
    #[error("endpoint rejected delivery: HTTP {status}")]
    Rejected {
        /// HTTP status code outside the accepted range
        status: u16,
        /// Status line text for audit entries
        status_text: String,
    },

    /// Durable store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Shutdown did not complete within the allowed window.
    #[error("shutdown timed out after {timeout_ms}ms")]
    ShutdownTimeout {
        /// Milliseconds waited before giving up
        timeout_ms: u64,
    },
}

impl DeliveryError {
    /// Creates a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a rejection error from an HTTP response.
    pub fn rejected(status: u16, status_text: impl Into<String>) -> Self {
        Self::Rejected { status, status_text: status_text.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Determines whether a failed delivery should be queued for retry.
    ///
    /// Every delivery-time failure is retryable except signing failures,
    /// which are deterministic: the same payload and key will fail again,
    /// so queueing them only burns retry passes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Rejected { .. }
            | Self::Storage { .. } => true,

            Self::Signing { .. } | Self::Configuration { .. } | Self::ShutdownTimeout { .. } => {
                false
            },
        }
    }
}

impl From<relay_core::CoreError> for DeliveryError {
    fn from(err: relay_core::CoreError) -> Self {
        Self::Storage { message: err.to_string() }
    }
}
