//! Capture, signing, delivery and retry pipeline for the message relay.
//!
//! Inbound messages flow through a single capture pass: allow-list filter,
//! dedup check, HMAC signing, HTTP delivery. Failures land in a durable
//! queue drained by a fixed-period retry scheduler whose attempt budget
//! adapts to network reachability.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod scheduler;
pub mod signer;

pub use capture::{BacklogStats, CaptureOutcome, CapturePipeline, MessageBacklog, SkipReason};
pub use client::{ClientConfig, DeliveryClient, DeliveryOutcome};
pub use config::{RelayConfig, SharedConfig};
pub use connectivity::{ConnectivityMonitor, MonitorConfig, OfflineAlert};
pub use error::{DeliveryError, Result};
pub use scheduler::{RetryScheduler, RetryStats, SchedulerHandle, OFFLINE_RETRY_LIMIT};
