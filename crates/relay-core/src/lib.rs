//! Core domain models and durable storage for the message relay.
//!
//! Provides strongly-typed domain primitives, the error taxonomy, and the
//! sled-backed stores (dedup set, failure queue, audit log) that the
//! delivery pipeline builds on. All other crates depend on these
//! foundational types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::{
    AuditEntry, AuditStream, ConnectivityState, Disposition, Fingerprint, Message,
    OutboundPayload, QueuedDelivery,
};
pub use storage::Storage;
