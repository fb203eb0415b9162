//! Durable queue of deliveries awaiting retry.

use sled::Tree;

use crate::{
    models::{Fingerprint, QueuedDelivery},
    Result,
};

/// Persistent failure queue keyed by message fingerprint.
///
/// Keying by fingerprint collapses duplicate captures of the same message
/// into one pending record, so a backlog scan re-observing a queued message
/// cannot double-enqueue it. Records are stored as JSON values.
#[derive(Debug, Clone)]
pub struct FailureQueue {
    tree: Tree,
}

impl FailureQueue {
    /// Opens the queue tree from the given database.
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self { tree: db.open_tree("failure_queue")? })
    }

    /// Adds a record unless one already exists for its fingerprint.
    ///
    /// Returns true if the record was inserted.
    pub fn enqueue(&self, record: &QueuedDelivery) -> Result<bool> {
        let key = record.fingerprint.as_bytes();
        if self.tree.contains_key(key)? {
            return Ok(false);
        }
        self.tree.insert(key, serde_json::to_vec(record)?)?;
        Ok(true)
    }

    /// Returns true if a record is queued for the fingerprint.
    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.tree.contains_key(fingerprint.as_bytes())?)
    }

    /// All queued records, in stable key order.
    pub fn list_all(&self) -> Result<Vec<QueuedDelivery>> {
        let mut records = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    /// Rewrites an existing record in place (same fingerprint key).
    pub fn update(&self, record: &QueuedDelivery) -> Result<()> {
        self.tree.insert(record.fingerprint.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    /// Removes the record for a fingerprint, if present.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.tree.remove(fingerprint.as_bytes())?;
        Ok(())
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
