//! Integration tests for the sled-backed stores working off one database.

use relay_core::{
    models::{AuditEntry, AuditStream, Disposition, Message, OutboundPayload, QueuedDelivery},
    Storage,
};

fn record_for(message: &Message) -> QueuedDelivery {
    let payload = OutboundPayload::from_message(message, "device").canonical_bytes().unwrap();
    QueuedDelivery::new(message.fingerprint(), message.sender.clone(), payload)
}

#[test]
fn all_stores_share_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let storage = Storage::open(&db, 8).unwrap();

    let message = Message::new("+79990000001", "code 1234", 1_700_000_000_000);
    let record = record_for(&message);

    storage.dedup.add(&message.fingerprint()).unwrap();
    storage.failures.enqueue(&record).unwrap();
    storage
        .audit
        .record(
            AuditStream::Failed,
            &AuditEntry::now(&message.sender, &message.body, None, Disposition::Failed),
        )
        .unwrap();

    assert!(storage.dedup.contains(&message.fingerprint()).unwrap());
    assert_eq!(storage.failures.len(), 1);
    assert_eq!(storage.audit.entries(AuditStream::Failed).unwrap().len(), 1);
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let message = Message::new("+79990000001", "code 1234", 1_700_000_000_000);
    let record = record_for(&message);

    {
        let db = sled::open(dir.path()).unwrap();
        let storage = Storage::open(&db, 8).unwrap();
        storage.dedup.add(&message.fingerprint()).unwrap();
        storage.failures.enqueue(&record).unwrap();
        db.flush().unwrap();
    }

    let db = sled::open(dir.path()).unwrap();
    let storage = Storage::open(&db, 8).unwrap();
    assert!(storage.dedup.contains(&message.fingerprint()).unwrap());
    assert_eq!(storage.failures.list_all().unwrap(), vec![record]);
}

#[test]
fn dedup_eviction_keeps_newest_entries() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let storage = Storage::open(&db, 2).unwrap();

    let messages: Vec<_> =
        (0..4).map(|i| Message::new("+7999", format!("msg {i}"), i)).collect();
    for message in &messages {
        storage.dedup.add(&message.fingerprint()).unwrap();
    }

    assert!(!storage.dedup.contains(&messages[0].fingerprint()).unwrap());
    assert!(!storage.dedup.contains(&messages[1].fingerprint()).unwrap());
    assert!(storage.dedup.contains(&messages[2].fingerprint()).unwrap());
    assert!(storage.dedup.contains(&messages[3].fingerprint()).unwrap());
}
