//! Bounded, durable set of fingerprints of already-forwarded messages.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use sled::Tree;

use crate::{models::Fingerprint, Result};

/// Persistent dedup set with FIFO eviction.
///
/// Two trees: `index` maps fingerprint to its insertion sequence number,
/// `order` maps the big-endian sequence number back to the fingerprint so
/// the oldest entry can be located without a scan. A fingerprint is only
/// added after a confirmed successful delivery, so a contained fingerprint
/// always means "already forwarded".
#[derive(Debug, Clone)]
pub struct DedupStore {
    index: Tree,
    order: Tree,
    capacity: usize,
    next_seq: Arc<AtomicU64>,
    // Serializes add/evict so concurrent capture passes cannot lose updates.
    write_lock: Arc<Mutex<()>>,
}

impl DedupStore {
    /// Opens the dedup trees from the given database.
    pub fn open(db: &sled::Db, capacity: usize) -> Result<Self> {
        let order = db.open_tree("dedup_order")?;
        // Resume the insertion sequence after the highest persisted key so
        // FIFO order survives a restart.
        let next_seq = order
            .last()?
            .and_then(|(k, _)| k.as_ref().try_into().ok().map(u64::from_be_bytes))
            .map_or(0, |max: u64| max + 1);
        Ok(Self {
            index: db.open_tree("dedup_index")?,
            order,
            capacity: capacity.max(1),
            next_seq: Arc::new(AtomicU64::new(next_seq)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Returns true if the fingerprint was already forwarded.
    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.index.contains_key(fingerprint.as_bytes())?)
    }

    /// Records a fingerprint as forwarded, evicting the oldest entries once
    /// the capacity is exceeded. Idempotent.
    pub fn add(&self, fingerprint: &Fingerprint) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.index.contains_key(fingerprint.as_bytes())? {
            return Ok(());
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.index.insert(fingerprint.as_bytes(), &seq.to_be_bytes()[..])?;
        self.order.insert(seq.to_be_bytes(), fingerprint.as_bytes())?;

        while self.order.len() > self.capacity {
            let Some((seq_key, fp_bytes)) = self.order.first()? else { break };
            self.order.remove(seq_key)?;
            self.index.remove(fp_bytes)?;
        }

        Ok(())
    }

    /// Number of fingerprints currently held.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no fingerprints are held.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(capacity: usize) -> (tempfile::TempDir, DedupStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (dir, DedupStore::open(&db, capacity).unwrap())
    }

    #[test]
    fn add_then_contains() {
        let (_dir, store) = open_store(16);
        let fp = Fingerprint::of("+7999", 1, "hi");

        assert!(!store.contains(&fp).unwrap());
        store.add(&fp).unwrap();
        assert!(store.contains(&fp).unwrap());
    }

    #[test]
    fn add_is_idempotent() {
        let (_dir, store) = open_store(16);
        let fp = Fingerprint::of("+7999", 1, "hi");

        store.add(&fp).unwrap();
        store.add(&fp).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let (_dir, store) = open_store(3);
        let fps: Vec<_> = (0..5).map(|i| Fingerprint::of("s", i, "b")).collect();
        for fp in &fps {
            store.add(fp).unwrap();
        }

        assert_eq!(store.len(), 3);
        assert!(!store.contains(&fps[0]).unwrap());
        assert!(!store.contains(&fps[1]).unwrap());
        assert!(store.contains(&fps[2]).unwrap());
        assert!(store.contains(&fps[4]).unwrap());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = Fingerprint::of("+7999", 1, "hi");
        {
            let db = sled::open(dir.path()).unwrap();
            let store = DedupStore::open(&db, 16).unwrap();
            store.add(&fp).unwrap();
            db.flush().unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let store = DedupStore::open(&db, 16).unwrap();
        assert!(store.contains(&fp).unwrap());
    }
}
