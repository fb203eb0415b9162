//! Durable storage backing the relay pipeline.
//!
//! All state that must survive a process restart lives here, in per-concern
//! stores opened from a single embedded [`sled::Db`]: the dedup set of
//! already-forwarded fingerprints, the failure queue of deliveries awaiting
//! retry, and the append-only audit streams.

mod audit;
mod dedup;
mod failure_queue;

pub use audit::AuditLog;
pub use dedup::DedupStore;
pub use failure_queue::FailureQueue;

use crate::Result;

/// Facade bundling all relay stores opened from one database.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Bounded set of fingerprints of already-forwarded messages.
    pub dedup: DedupStore,
    /// Durable queue of deliveries that failed immediate delivery.
    pub failures: FailureQueue,
    /// Append-only audit streams, one per outcome category.
    pub audit: AuditLog,
}

impl Storage {
    /// Opens all stores from the given database.
    ///
    /// `dedup_capacity` bounds the dedup set; the oldest fingerprints are
    /// evicted once the cap is reached.
    pub fn open(db: &sled::Db, dedup_capacity: usize) -> Result<Self> {
        Ok(Self {
            dedup: DedupStore::open(db, dedup_capacity)?,
            failures: FailureQueue::open(db)?,
            audit: AuditLog::open(db)?,
        })
    }
}
