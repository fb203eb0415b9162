//! Append-only audit streams.

use sled::Db;

use crate::{
    models::{AuditEntry, AuditStream},
    Result,
};

/// Append-only log of delivery outcomes, one sled tree per stream.
///
/// Entries are keyed by a monotonic database-generated id so iteration
/// yields insertion order. Write-mostly: the pipeline never reads entries
/// back, only tests and operators do.
#[derive(Debug, Clone)]
pub struct AuditLog {
    db: Db,
}

impl AuditLog {
    /// Opens the audit trees from the given database.
    pub fn open(db: &sled::Db) -> Result<Self> {
        for stream in [AuditStream::Accepted, AuditStream::Failed, AuditStream::Retried] {
            db.open_tree(stream.tree_name())?;
        }
        Ok(Self { db: db.clone() })
    }

    /// Appends an entry to the given stream.
    pub fn record(&self, stream: AuditStream, entry: &AuditEntry) -> Result<()> {
        let key = self.db.generate_id()?.to_be_bytes();
        self.db.open_tree(stream.tree_name())?.insert(key, serde_json::to_vec(entry)?)?;
        Ok(())
    }

    /// All entries of a stream, oldest first.
    pub fn entries(&self, stream: AuditStream) -> Result<Vec<AuditEntry>> {
        let tree = self.db.open_tree(stream.tree_name())?;
        let mut entries = Vec::with_capacity(tree.len());
        for item in tree.iter() {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Disposition;

    #[test]
    fn records_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let log = AuditLog::open(&db).unwrap();

        for i in 0..3 {
            let entry =
                AuditEntry::now("+7999", format!("msg {i}"), None, Disposition::Accepted);
            log.record(AuditStream::Accepted, &entry).unwrap();
        }

        let entries = log.entries(AuditStream::Accepted).unwrap();
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2"]);
    }

    #[test]
    fn streams_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let log = AuditLog::open(&db).unwrap();

        let failed = AuditEntry::now(
            "+7999",
            "boom",
            Some("connection refused".into()),
            Disposition::Failed,
        );
        log.record(AuditStream::Failed, &failed).unwrap();

        assert!(log.entries(AuditStream::Accepted).unwrap().is_empty());
        assert!(log.entries(AuditStream::Retried).unwrap().is_empty());
        let entries = log.entries(AuditStream::Failed).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_text.as_deref(), Some("connection refused"));
    }
}
